use crate::analyzer::report::{FindingRow, Severity};
use crate::analyzer::EXPENSIVE_RUNNER;
use crate::config::AuditConfig;
use crate::stats::WorkflowStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Thresholds for the ranked report sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportOptions {
    pub top_n: usize,
    pub schedule_threshold: usize,
    pub push_dominant_ratio: f64,
    pub push_dominant_min_runs: usize,
    pub failure_ratio: f64,
    pub cancel_ratio: f64,
    pub min_runs: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self::from(&AuditConfig::default())
    }
}

impl From<&AuditConfig> for ReportOptions {
    fn from(config: &AuditConfig) -> Self {
        Self {
            top_n: config.top_n,
            schedule_threshold: config.schedule_threshold,
            push_dominant_ratio: config.push_dominant_ratio,
            push_dominant_min_runs: config.push_dominant_min_runs,
            failure_ratio: config.failure_ratio,
            cancel_ratio: config.cancel_ratio,
            min_runs: config.min_runs,
        }
    }
}

/// A workflow in a ranked section, with the value it was ranked by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub repository: String,
    pub workflow: String,
    pub total: usize,
    /// Count behind the metric (scheduled, push, failed or cancelled runs).
    pub count: usize,
    pub metric: f64,
}

/// Finding totals for one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCount {
    pub rule: String,
    pub total: usize,
    pub warnings: usize,
    pub infos: usize,
}

/// Expensive-runner findings split by reach.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerSplit {
    pub on_all: usize,
    pub limited: usize,
}

/// How much of the fleet the report actually covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    #[serde(default)]
    pub owners_requested: usize,
    /// Owners whose repository listing failed.
    #[serde(default)]
    pub owners_skipped: usize,
    pub repositories_requested: usize,
    pub repositories_audited: usize,
    /// Run history could not be fetched.
    pub repositories_skipped: usize,
    /// Not started because the audit was cancelled.
    pub repositories_cancelled: usize,
    pub files_analyzed: usize,
    pub files_skipped: usize,
    pub degraded_documents: usize,
    pub rule_failures: usize,
    pub cancelled: bool,
}

/// Complete rendered audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub workflow_count: usize,
    pub total_runs: usize,
    pub busiest: Vec<RankedEntry>,
    pub schedule_heavy: Vec<RankedEntry>,
    pub push_dominant: Vec<RankedEntry>,
    pub high_failure: Vec<RankedEntry>,
    pub high_cancellation: Vec<RankedEntry>,
    pub rule_counts: Vec<RuleCount>,
    pub expensive_runners: RunnerSplit,
    pub expensive_runners_by_tag: BTreeMap<String, RunnerSplit>,
    pub total_findings: usize,
    pub coverage: Coverage,
}

fn entry(stats: &WorkflowStats, count: usize, metric: f64) -> RankedEntry {
    RankedEntry {
        repository: stats.repository.clone(),
        workflow: stats.workflow.clone(),
        total: stats.total,
        count,
        metric,
    }
}

/// Stable descending sort, so ties keep insertion order.
fn rank(mut entries: Vec<RankedEntry>) -> Vec<RankedEntry> {
    entries.sort_by(|a, b| b.metric.total_cmp(&a.metric));
    entries
}

pub fn top_by_total(stats: &[WorkflowStats], n: usize) -> Vec<RankedEntry> {
    let mut entries = rank(
        stats
            .iter()
            .map(|s| entry(s, s.total, s.total as f64))
            .collect(),
    );
    entries.truncate(n);
    entries
}

pub fn schedule_heavy(stats: &[WorkflowStats], threshold: usize) -> Vec<RankedEntry> {
    rank(
        stats
            .iter()
            .filter(|s| s.triggers.schedule > threshold)
            .map(|s| entry(s, s.triggers.schedule, s.triggers.schedule as f64))
            .collect(),
    )
}

pub fn push_dominant(stats: &[WorkflowStats], ratio: f64, min_runs: usize) -> Vec<RankedEntry> {
    rank(
        stats
            .iter()
            .filter(|s| s.total >= min_runs && s.push_fraction() > ratio)
            .map(|s| entry(s, s.triggers.push, s.push_fraction()))
            .collect(),
    )
}

pub fn high_failure(stats: &[WorkflowStats], ratio: f64, min_runs: usize) -> Vec<RankedEntry> {
    rank(
        stats
            .iter()
            .filter(|s| s.total >= min_runs && s.failure_rate() > ratio)
            .map(|s| entry(s, s.failed, s.failure_rate()))
            .collect(),
    )
}

pub fn high_cancellation(stats: &[WorkflowStats], ratio: f64, min_runs: usize) -> Vec<RankedEntry> {
    rank(
        stats
            .iter()
            .filter(|s| s.total >= min_runs && s.cancellation_rate() > ratio)
            .map(|s| entry(s, s.cancelled, s.cancellation_rate()))
            .collect(),
    )
}

/// Per-rule counts: `rule_order` first (zeros included), then unknown rules as seen.
pub fn rule_counts(findings: &[FindingRow], rule_order: &[&str]) -> Vec<RuleCount> {
    let mut counts: Vec<RuleCount> = rule_order
        .iter()
        .map(|rule| RuleCount {
            rule: rule.to_string(),
            total: 0,
            warnings: 0,
            infos: 0,
        })
        .collect();

    for row in findings {
        let position = match counts.iter().position(|c| c.rule == row.finding.rule) {
            Some(position) => position,
            None => {
                counts.push(RuleCount {
                    rule: row.finding.rule.clone(),
                    total: 0,
                    warnings: 0,
                    infos: 0,
                });
                counts.len() - 1
            }
        };
        let count = &mut counts[position];
        count.total += 1;
        match row.finding.severity {
            Severity::Warning => count.warnings += 1,
            Severity::Info => count.infos += 1,
        }
    }

    counts
}

/// Expensive-runner findings: warnings ran on all branches, infos were limited.
pub fn expensive_runner_split(findings: &[FindingRow]) -> (RunnerSplit, BTreeMap<String, RunnerSplit>) {
    let mut overall = RunnerSplit::default();
    let mut by_tag: BTreeMap<String, RunnerSplit> = BTreeMap::new();

    for finding in findings
        .iter()
        .map(|row| &row.finding)
        .filter(|f| f.rule == EXPENSIVE_RUNNER)
    {
        let tag = finding.tag.clone().unwrap_or_else(|| "UNTAGGED".to_string());
        let split = by_tag.entry(tag).or_default();
        match finding.severity {
            Severity::Warning => {
                overall.on_all += 1;
                split.on_all += 1;
            }
            Severity::Info => {
                overall.limited += 1;
                split.limited += 1;
            }
        }
    }

    (overall, by_tag)
}

/// Build every report section from the collected statistics and findings.
pub fn render(
    stats: &[WorkflowStats],
    findings: &[FindingRow],
    rule_order: &[&str],
    coverage: Coverage,
    options: &ReportOptions,
) -> AuditReport {
    let (expensive_runners, expensive_runners_by_tag) = expensive_runner_split(findings);

    AuditReport {
        workflow_count: stats.len(),
        total_runs: stats.iter().map(|s| s.total).sum(),
        busiest: top_by_total(stats, options.top_n),
        schedule_heavy: schedule_heavy(stats, options.schedule_threshold),
        push_dominant: push_dominant(stats, options.push_dominant_ratio, options.push_dominant_min_runs),
        high_failure: high_failure(stats, options.failure_ratio, options.min_runs),
        high_cancellation: high_cancellation(stats, options.cancel_ratio, options.min_runs),
        rule_counts: rule_counts(findings, rule_order),
        expensive_runners,
        expensive_runners_by_tag,
        total_findings: findings.len(),
        coverage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::report::Finding;
    use crate::stats::TriggerCounts;
    use chrono::Utc;

    fn stats(workflow: &str, total: usize, failed: usize, cancelled: usize, triggers: TriggerCounts) -> WorkflowStats {
        WorkflowStats {
            repository: "repo".to_string(),
            workflow: workflow.to_string(),
            window_start: Utc::now(),
            window_end: Utc::now(),
            total,
            failed,
            cancelled,
            triggers,
        }
    }

    fn pushes(push: usize, other: usize) -> TriggerCounts {
        TriggerCounts {
            push,
            other,
            ..TriggerCounts::default()
        }
    }

    fn row(rule: &str, severity: Severity, tag: Option<&str>) -> FindingRow {
        FindingRow {
            repository: "repo".to_string(),
            finding: Finding {
                rule: rule.to_string(),
                severity,
                message: String::new(),
                file: "ci.yml".to_string(),
                tag: tag.map(String::from),
            },
        }
    }

    #[test]
    fn test_top_by_total_ties_keep_order() {
        let all = vec![
            stats("a", 5, 0, 0, pushes(5, 0)),
            stats("b", 9, 0, 0, pushes(9, 0)),
            stats("c", 5, 0, 0, pushes(5, 0)),
            stats("d", 1, 0, 0, pushes(1, 0)),
        ];
        let names: Vec<_> = top_by_total(&all, 3).into_iter().map(|e| e.workflow).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_push_dominant_thresholds() {
        let all = vec![
            stats("ci", 12, 2, 0, TriggerCounts { push: 9, pull_request: 3, ..Default::default() }),
            stats("exact", 10, 0, 0, pushes(7, 3)),
            stats("small", 9, 0, 0, pushes(9, 0)),
            stats("all", 20, 0, 0, pushes(20, 0)),
        ];
        let entries = push_dominant(&all, 0.7, 10);
        let names: Vec<_> = entries.iter().map(|e| e.workflow.as_str()).collect();
        assert_eq!(names, vec!["all", "ci"]);
        assert!((entries[1].metric - 0.75).abs() < 1e-9);
        assert_eq!(entries[1].count, 9);
    }

    #[test]
    fn test_failure_and_cancellation_thresholds() {
        let all = vec![
            stats("flaky", 10, 4, 0, pushes(10, 0)),
            stats("edge", 10, 3, 2, pushes(10, 0)),
            stats("tiny", 4, 4, 4, pushes(4, 0)),
            stats("churn", 10, 0, 5, pushes(10, 0)),
        ];
        let failing: Vec<_> = high_failure(&all, 0.3, 5).into_iter().map(|e| e.workflow).collect();
        assert_eq!(failing, vec!["flaky"]);
        let cancelled: Vec<_> = high_cancellation(&all, 0.2, 5).into_iter().map(|e| e.workflow).collect();
        assert_eq!(cancelled, vec!["churn"]);
    }

    #[test]
    fn test_schedule_heavy_is_strict() {
        let scheduled = |n| TriggerCounts { schedule: n, ..Default::default() };
        let all = vec![
            stats("at", 20, 0, 0, scheduled(20)),
            stats("over", 30, 0, 0, scheduled(30)),
            stats("way-over", 90, 0, 0, scheduled(90)),
        ];
        let names: Vec<_> = schedule_heavy(&all, 20).into_iter().map(|e| e.workflow).collect();
        assert_eq!(names, vec!["way-over", "over"]);
    }

    #[test]
    fn test_rule_counts_and_runner_split() {
        let findings = vec![
            row("NO_TIMEOUT", Severity::Info, None),
            row(EXPENSIVE_RUNNER, Severity::Warning, Some("MACOS_10X")),
            row(EXPENSIVE_RUNNER, Severity::Info, Some("MACOS_10X")),
            row(EXPENSIVE_RUNNER, Severity::Warning, Some("WINDOWS_2X")),
            row("CUSTOM", Severity::Warning, None),
            row("NO_TIMEOUT", Severity::Info, None),
        ];
        let counts = rule_counts(&findings, &["PUSH_ALL_BRANCHES", "NO_TIMEOUT", EXPENSIVE_RUNNER]);
        let summary: Vec<_> = counts.iter().map(|c| (c.rule.as_str(), c.total)).collect();
        assert_eq!(
            summary,
            vec![("PUSH_ALL_BRANCHES", 0), ("NO_TIMEOUT", 2), (EXPENSIVE_RUNNER, 3), ("CUSTOM", 1)]
        );

        let (overall, by_tag) = expensive_runner_split(&findings);
        assert_eq!(overall, RunnerSplit { on_all: 2, limited: 1 });
        assert_eq!(by_tag["MACOS_10X"], RunnerSplit { on_all: 1, limited: 1 });
        assert_eq!(by_tag["WINDOWS_2X"], RunnerSplit { on_all: 1, limited: 0 });
    }

    #[test]
    fn test_render_is_deterministic() {
        let all = vec![stats("ci", 12, 2, 0, pushes(9, 3))];
        let findings = vec![row("NO_TIMEOUT", Severity::Info, None)];
        let options = ReportOptions::default();
        let first = render(&all, &findings, &["NO_TIMEOUT"], Coverage::default(), &options);
        let second = render(&all, &findings, &["NO_TIMEOUT"], Coverage::default(), &options);
        assert_eq!(first, second);
        assert_eq!(first.total_runs, 12);
        assert_eq!(first.push_dominant.len(), 1);
        assert_eq!(first.total_findings, 1);
    }
}
