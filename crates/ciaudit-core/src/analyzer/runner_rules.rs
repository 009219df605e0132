use crate::analyzer::report::Detection;
use crate::error::RuleError;
use crate::parser::document::{JobSpec, PipelineDocument, TriggerKind};
use regex::Regex;
use std::sync::OnceLock;

/// Hosted runner families billed above the Linux rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerFamily {
    MacOs,
    Windows,
}

impl RunnerFamily {
    pub const ALL: [RunnerFamily; 2] = [RunnerFamily::MacOs, RunnerFamily::Windows];

    pub fn tag(&self) -> &'static str {
        match self {
            RunnerFamily::MacOs => "MACOS_10X",
            RunnerFamily::Windows => "WINDOWS_2X",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunnerFamily::MacOs => "macOS",
            RunnerFamily::Windows => "Windows",
        }
    }

    pub fn cost_multiplier(&self) -> u32 {
        match self {
            RunnerFamily::MacOs => 10,
            RunnerFamily::Windows => 2,
        }
    }

    pub fn matches(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        match self {
            RunnerFamily::MacOs => label.contains("macos"),
            RunnerFamily::Windows => label.contains("windows"),
        }
    }
}

fn protected_condition() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(main|master|default_branch|schedule)\b").expect("valid condition regex")
    })
}

/// Self-hosted runners are not billed per minute.
fn runs_on_family(job: &JobSpec, family: RunnerFamily) -> bool {
    let self_hosted = job
        .runs_on
        .iter()
        .any(|l| l.eq_ignore_ascii_case("self-hosted"));
    !self_hosted && job.runs_on.iter().any(|l| family.matches(l))
}

/// A job `if:` that limits execution to the default branch or scheduled runs.
fn condition_restricts(job: &JobSpec) -> bool {
    job.condition
        .as_deref()
        .is_some_and(|cond| protected_condition().is_match(cond))
}

/// macOS/Windows jobs, split into "on all" (warning) and "limited" (info).
///
/// "Limited" needs positive evidence: a push `branches` filter naming main/master,
/// and, with a pull_request trigger, an `if:` on every such job referencing the
/// default branch or the schedule event.
pub fn expensive_runner(doc: &PipelineDocument) -> Result<Vec<Detection>, RuleError> {
    let mut detections = Vec::new();

    let push_unrestricted = doc
        .trigger(&TriggerKind::Push)
        .is_some_and(|push| !push.filters.names_protected_branch());

    for family in RunnerFamily::ALL {
        let jobs: Vec<&JobSpec> = doc
            .jobs()
            .iter()
            .filter(|job| runs_on_family(job, family))
            .collect();

        if jobs.is_empty() {
            continue;
        }

        let pr_unrestricted = doc.has_trigger(&TriggerKind::PullRequest)
            && jobs.iter().any(|job| !condition_restricts(job));
        let on_all = push_unrestricted || pr_unrestricted;

        let job_ids = jobs.iter().map(|j| j.id.as_str()).collect::<Vec<_>>().join(", ");
        let detection = if on_all {
            Detection::warning(format!(
                "{} runners ({}x Linux cost) in jobs [{}] run on all branches",
                family.label(),
                family.cost_multiplier(),
                job_ids
            ))
        } else {
            Detection::info(format!(
                "{} runners ({}x Linux cost) in jobs [{}] limited to protected branch",
                family.label(),
                family.cost_multiplier(),
                job_ids
            ))
        };

        detections.push(detection.with_tag(family.tag()));
    }

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::report::Severity;
    use crate::parser::github::WorkflowParser;

    fn run(yaml: &str) -> Vec<Detection> {
        expensive_runner(&WorkflowParser::parse(yaml)).unwrap()
    }

    #[test]
    fn test_macos_limited_to_main() {
        let findings = run(
            "on:\n  push:\n    branches: [main]\njobs:\n  build:\n    runs-on: macos-latest\n",
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Info);
        assert_eq!(findings[0].tag.as_deref(), Some("MACOS_10X"));
        assert!(findings[0].message.contains("limited"));
    }

    #[test]
    fn test_macos_on_all_branches() {
        let findings = run("on:\n  push:\njobs:\n  build:\n    runs-on: macos-latest\n");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[0].tag.as_deref(), Some("MACOS_10X"));
    }

    #[test]
    fn test_non_protected_branch_filter_is_on_all() {
        let findings = run(
            "on:\n  push:\n    branches: [develop]\njobs:\n  build:\n    runs-on: windows-2022\n",
        );
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[0].tag.as_deref(), Some("WINDOWS_2X"));
    }

    #[test]
    fn test_pull_request_needs_conditional() {
        let unguarded = run(
            "on:\n  push:\n    branches: [main]\n  pull_request:\njobs:\n  build:\n    runs-on: macos-14\n",
        );
        assert_eq!(unguarded[0].severity, Severity::Warning);

        let guarded = run(
            "on:\n  push:\n    branches: [main]\n  pull_request:\njobs:\n  build:\n    runs-on: macos-14\n    if: github.ref == 'refs/heads/main'\n",
        );
        assert_eq!(guarded[0].severity, Severity::Info);

        let scheduled = run(
            "on:\n  pull_request:\n  schedule:\n    - cron: '0 3 * * *'\njobs:\n  build:\n    runs-on: macos-14\n    if: github.event_name == 'schedule'\n",
        );
        assert_eq!(scheduled[0].severity, Severity::Info);
    }

    #[test]
    fn test_one_finding_per_family() {
        let yaml = r#"
on: push
jobs:
  mac-a:
    runs-on: macos-latest
  mac-b:
    runs-on: macos-13
  win:
    runs-on: windows-latest
  linux:
    runs-on: ubuntu-latest
"#;
        let findings = run(yaml);
        let tags: Vec<_> = findings.iter().filter_map(|f| f.tag.as_deref()).collect();
        assert_eq!(tags, vec!["MACOS_10X", "WINDOWS_2X"]);
        assert!(findings[0].message.contains("[mac-a, mac-b]"));
    }

    #[test]
    fn test_matrix_runner_labels_are_resolved() {
        let yaml = r#"
on: pull_request
jobs:
  test:
    runs-on: ${{ matrix.os }}
    strategy:
      matrix:
        os: [ubuntu-latest, windows-latest]
"#;
        let findings = run(yaml);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].tag.as_deref(), Some("WINDOWS_2X"));
        assert_eq!(findings[0].severity, Severity::Warning);
    }

    #[test]
    fn test_self_hosted_and_linux_ignored() {
        assert!(run("on: push\njobs:\n  a:\n    runs-on: [self-hosted, macos]\n").is_empty());
        assert!(run("on: push\njobs:\n  a:\n    runs-on: ubuntu-latest\n").is_empty());
    }
}
