use crate::analyzer::report::Detection;
use crate::error::RuleError;
use crate::parser::document::{PipelineDocument, TriggerKind};
use regex::Regex;
use std::sync::OnceLock;

/// Push trigger that fires for every branch and every path.
pub fn push_all_branches(doc: &PipelineDocument) -> Result<Vec<Detection>, RuleError> {
    let Some(push) = doc.trigger(&TriggerKind::Push) else {
        return Ok(Vec::new());
    };

    if push.filters.has_branch_or_path_filter() {
        return Ok(Vec::new());
    }

    Ok(vec![Detection::warning(
        "Runs on every push to every branch. Add a `branches`, `paths` or \
         `paths-ignore` filter to the push trigger.",
    )])
}

/// Push/PR workflows without a concurrency group let superseded runs finish.
pub fn no_concurrency(doc: &PipelineDocument) -> Result<Vec<Detection>, RuleError> {
    let triggered = doc.has_trigger(&TriggerKind::Push) || doc.has_trigger(&TriggerKind::PullRequest);

    if !triggered || doc.has_concurrency_group() {
        return Ok(Vec::new());
    }

    Ok(vec![Detection::info(
        "No concurrency group. Superseded push/PR runs keep running; add \
         `concurrency: { group: ..., cancel-in-progress: true }`.",
    )])
}

/// `pull_request` without `types:` reacts to every default activity type.
pub fn pr_all_events(doc: &PipelineDocument) -> Result<Vec<Detection>, RuleError> {
    let Some(pr) = doc.trigger(&TriggerKind::PullRequest) else {
        return Ok(Vec::new());
    };

    if pr.filters.types.is_some() {
        return Ok(Vec::new());
    }

    Ok(vec![Detection::info(
        "pull_request trigger has no `types` list and runs on every default PR event.",
    )])
}

/// Cron schedules whose minute field fires every minute or every 1-9 minutes.
pub fn frequent_schedule(doc: &PipelineDocument) -> Result<Vec<Detection>, RuleError> {
    let Some(schedule) = doc.trigger(&TriggerKind::Schedule) else {
        return Ok(Vec::new());
    };

    let frequent: Vec<&str> = schedule
        .crons
        .iter()
        .map(String::as_str)
        .filter(|cron| is_frequent_cron(cron))
        .collect();

    if frequent.is_empty() {
        return Ok(Vec::new());
    }

    Ok(vec![Detection::warning(format!(
        "Schedule fires at most every 9 minutes: {}",
        frequent
            .iter()
            .map(|c| format!("'{c}'"))
            .collect::<Vec<_>>()
            .join(", ")
    ))])
}

/// Heuristic: minute slot is `*` or `*/N` with N in 1..=9.
pub fn is_frequent_cron(cron: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^\*(/0*[1-9])?$").expect("valid cron regex"));

    cron.split_whitespace()
        .next()
        .is_some_and(|minute| re.is_match(minute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::report::Severity;
    use crate::parser::github::WorkflowParser;

    fn doc(on: &str) -> PipelineDocument {
        WorkflowParser::parse(&format!(
            "on:\n{on}\njobs:\n  build:\n    runs-on: ubuntu-latest\n"
        ))
    }

    #[test]
    fn test_push_all_branches_fires_without_filters() {
        let findings = push_all_branches(&doc("  push:")).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
    }

    #[test]
    fn test_push_all_branches_suppressed_by_each_filter() {
        for filter in ["branches: [main]", "paths: ['src/**']", "paths-ignore: ['docs/**']"] {
            let d = doc(&format!("  push:\n    {filter}"));
            assert!(push_all_branches(&d).unwrap().is_empty(), "{filter}");
        }
    }

    #[test]
    fn test_push_all_branches_not_suppressed_by_tags() {
        let d = doc("  push:\n    tags: ['v*']");
        assert_eq!(push_all_branches(&d).unwrap().len(), 1);
    }

    #[test]
    fn test_push_all_branches_needs_push() {
        assert!(push_all_branches(&doc("  pull_request:")).unwrap().is_empty());
    }

    #[test]
    fn test_no_concurrency() {
        assert_eq!(no_concurrency(&doc("  pull_request:")).unwrap().len(), 1);
        assert!(no_concurrency(&doc("  workflow_dispatch:")).unwrap().is_empty());

        let with_group = WorkflowParser::parse(
            "on: push\nconcurrency: ${{ github.ref }}\njobs:\n  a:\n    runs-on: x\n",
        );
        assert!(no_concurrency(&with_group).unwrap().is_empty());
    }

    #[test]
    fn test_pr_all_events() {
        assert_eq!(pr_all_events(&doc("  pull_request:")).unwrap().len(), 1);
        let typed = doc("  pull_request:\n    types: [opened]");
        assert!(pr_all_events(&typed).unwrap().is_empty());
    }

    #[test]
    fn test_frequent_cron_heuristic() {
        assert!(is_frequent_cron("*/5 * * * *"));
        assert!(is_frequent_cron("* * * * *"));
        assert!(is_frequent_cron("*/1 * * * *"));
        assert!(!is_frequent_cron("0 9 * * 1"));
        assert!(!is_frequent_cron("*/10 * * * *"));
        assert!(!is_frequent_cron("*/15 * * * *"));
        assert!(!is_frequent_cron(""));
    }

    #[test]
    fn test_frequent_schedule_rule() {
        let frequent = doc("  schedule:\n    - cron: '*/5 * * * *'");
        let findings = frequent_schedule(&frequent).unwrap();
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("*/5 * * * *"));

        let weekly = doc("  schedule:\n    - cron: '0 9 * * 1'");
        assert!(frequent_schedule(&weekly).unwrap().is_empty());
    }
}
