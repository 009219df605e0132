use crate::analyzer::report::Detection;
use crate::error::RuleError;
use crate::parser::document::{PipelineDocument, StepSpec};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

fn checkout_version() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^actions/checkout@v([0-9]+)(\.[0-9]+)*$").expect("valid checkout regex")
    })
}

fn dependency_install() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?im)(\bnpm\s+(install|ci|i)\b|\byarn\s+install\b|^\s*yarn\s*$|\bpnpm\s+(install|i)\b|\bpip3?\s+install\b|\bpipenv\s+install\b|\bpoetry\s+install\b|\bbundle\s+install\b|\bcomposer\s+install\b|\bgo\s+mod\s+download\b|\bgradlew?\s+dependencies\b|\bmvn\s+dependency:)",
        )
        .expect("valid install regex")
    })
}

/// Artifact uploads with no `retention-days` anywhere keep the 90-day default.
pub fn artifact_no_retention(doc: &PipelineDocument) -> Result<Vec<Detection>, RuleError> {
    if doc.retention_declared {
        return Ok(Vec::new());
    }

    let jobs: BTreeSet<&str> = doc
        .steps()
        .filter(|(_, step)| step.action_name() == Some("actions/upload-artifact"))
        .map(|(job, _)| job.id.as_str())
        .collect();

    if jobs.is_empty() {
        return Ok(Vec::new());
    }

    Ok(vec![Detection::info(format!(
        "Artifact upload without `retention-days` in jobs [{}] (default retention is 90 days)",
        jobs.into_iter().collect::<Vec<_>>().join(", ")
    ))])
}

/// `actions/checkout` pinned to major version 1 or 2.
pub fn old_checkout(doc: &PipelineDocument) -> Result<Vec<Detection>, RuleError> {
    let mut refs: BTreeSet<&str> = BTreeSet::new();

    for (_, step) in doc.steps() {
        let Some(uses) = step.action_ref() else {
            continue;
        };
        let Some(captures) = checkout_version().captures(uses) else {
            continue;
        };
        if matches!(&captures[1], "1" | "2") {
            refs.insert(uses);
        }
    }

    if refs.is_empty() {
        return Ok(Vec::new());
    }

    Ok(vec![Detection::info(format!(
        "Outdated checkout action: {}",
        refs.into_iter().collect::<Vec<_>>().join(", ")
    ))])
}

/// Dependency installs with no cache action or setup-action cache anywhere.
pub fn no_cache(doc: &PipelineDocument) -> Result<Vec<Detection>, RuleError> {
    if doc.steps().any(|(_, step)| provides_cache(step)) {
        return Ok(Vec::new());
    }

    let jobs: BTreeSet<&str> = doc
        .steps()
        .filter(|(_, step)| installs_dependencies(step))
        .map(|(job, _)| job.id.as_str())
        .collect();

    if jobs.is_empty() {
        return Ok(Vec::new());
    }

    Ok(vec![Detection::info(format!(
        "Dependencies installed without caching in jobs [{}]",
        jobs.into_iter().collect::<Vec<_>>().join(", ")
    ))])
}

pub fn installs_dependencies(step: &StepSpec) -> bool {
    let re = dependency_install();
    step.run.as_deref().is_some_and(|run| re.is_match(run))
        || step.params().values().any(|value| re.is_match(value))
}

/// `actions/cache` (and friends) or a setup action with a `cache`-style input.
pub fn provides_cache(step: &StepSpec) -> bool {
    let action_is_cache = step
        .action_name()
        .is_some_and(|name| name.to_lowercase().contains("cache"));

    let cache_param = step.params().iter().any(|(key, value)| {
        (key == "cache" || key.ends_with("-cache"))
            && !value.trim().is_empty()
            && value.trim() != "false"
    });

    action_is_cache || cache_param
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::github::WorkflowParser;

    fn steps_doc(steps: &str) -> PipelineDocument {
        WorkflowParser::parse(&format!(
            "on: push\njobs:\n  build:\n    runs-on: ubuntu-latest\n    steps:\n{steps}"
        ))
    }

    #[test]
    fn test_artifact_no_retention() {
        let doc = steps_doc("      - uses: actions/upload-artifact@v4\n        with:\n          name: dist\n");
        assert_eq!(artifact_no_retention(&doc).unwrap().len(), 1);

        let retained = steps_doc(
            "      - uses: actions/upload-artifact@v4\n        with:\n          retention-days: 3\n",
        );
        assert!(artifact_no_retention(&retained).unwrap().is_empty());
    }

    #[test]
    fn test_retention_anywhere_counts() {
        let yaml = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/upload-artifact@v4
  other:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/upload-artifact@v4
        with:
          retention-days: 1
"#;
        assert!(artifact_no_retention(&WorkflowParser::parse(yaml))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_old_checkout_versions() {
        for (uses, fires) in [
            ("actions/checkout@v1", true),
            ("actions/checkout@v2", true),
            ("actions/checkout@v2.3.4", true),
            ("actions/checkout@v3", false),
            ("actions/checkout@v4", false),
            ("actions/checkout@v20", false),
            ("actions/checkout@main", false),
            ("someone/checkout@v2", false),
        ] {
            let doc = steps_doc(&format!("      - uses: {uses}\n"));
            assert_eq!(!old_checkout(&doc).unwrap().is_empty(), fires, "{uses}");
        }
    }

    #[test]
    fn test_no_cache_fires_for_installs() {
        for run in ["npm ci", "npm install", "pip install -r requirements.txt", "bundle install", "go mod download"] {
            let doc = steps_doc(&format!("      - run: {run}\n"));
            assert_eq!(no_cache(&doc).unwrap().len(), 1, "{run}");
        }
    }

    #[test]
    fn test_no_cache_quiet_without_install() {
        let doc = steps_doc("      - run: npm test\n      - run: cargo build\n");
        assert!(no_cache(&doc).unwrap().is_empty());
    }

    #[test]
    fn test_cache_action_suppresses() {
        let doc = steps_doc(
            "      - uses: actions/cache@v4\n        with:\n          path: ~/.npm\n          key: npm\n      - run: npm ci\n",
        );
        assert!(no_cache(&doc).unwrap().is_empty());
    }

    #[test]
    fn test_setup_cache_param_suppresses() {
        let doc = steps_doc(
            "      - uses: actions/setup-node@v4\n        with:\n          cache: npm\n      - run: npm ci\n",
        );
        assert!(no_cache(&doc).unwrap().is_empty());

        let ruby = steps_doc(
            "      - uses: ruby/setup-ruby@v1\n        with:\n          bundler-cache: true\n      - run: bundle install\n",
        );
        assert!(no_cache(&ruby).unwrap().is_empty());

        let disabled = steps_doc(
            "      - uses: actions/setup-node@v4\n        with:\n          cache: false\n      - run: npm ci\n",
        );
        assert_eq!(no_cache(&disabled).unwrap().len(), 1);
    }
}
