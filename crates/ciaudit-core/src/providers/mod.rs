pub mod github_api;

use crate::error::FetchError;
use crate::stats::RunRecord;
use async_trait::async_trait;

/// Read-only view of a code hosting service.
#[async_trait]
pub trait HostingApi: Send + Sync {
    /// Repositories (`owner/name`) belonging to an organization or user.
    async fn list_repositories(&self, owner: &str) -> Result<Vec<String>, FetchError>;

    /// Most recent workflow runs of a repository, newest first.
    async fn list_run_records(&self, repository: &str, limit: usize) -> Result<Vec<RunRecord>, FetchError>;

    /// File names in the repository's workflow directory.
    async fn list_definition_files(&self, repository: &str) -> Result<Vec<String>, FetchError>;

    /// Raw content of one workflow file, `None` when it does not exist.
    async fn fetch_definition(&self, repository: &str, file: &str) -> Result<Option<String>, FetchError>;
}

/// Workflow definition files are the `.yml`/`.yaml` entries.
pub fn is_definition_file(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".yml") || lower.ends_with(".yaml")
}
