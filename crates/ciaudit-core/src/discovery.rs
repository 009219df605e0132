use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Collect workflow files for `ciaudit lint`.
///
/// A file path is returned as-is. A directory is searched recursively for
/// `.yml`/`.yaml` files, sorted by path.
pub fn discover_workflow_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    if path.is_dir() {
        let mut files: Vec<PathBuf> = Vec::new();
        for ext in ["yml", "yaml"] {
            let pattern = format!("{}/**/*.{}", path.display(), ext);
            files.extend(
                glob::glob(&pattern)
                    .context("Failed to read glob pattern")?
                    .filter_map(|r| r.ok())
                    .filter(|p| p.is_file()),
            );
        }
        files.sort();
        files.dedup();
        return Ok(files);
    }

    anyhow::bail!("Path '{}' does not exist", path.display());
}

/// The conventional workflow directory of a checked-out repository.
pub fn workflow_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(".github").join("workflows")
}
