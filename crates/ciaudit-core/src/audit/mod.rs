use crate::analyzer::report::FindingRow;
use crate::analyzer::RuleEngine;
use crate::config::AuditConfig;
use crate::parser::github::WorkflowParser;
use crate::providers::{is_definition_file, HostingApi};
use crate::render::{self, AuditReport, Coverage, ReportOptions};
use crate::stats::{self, RunRecord, StatsRow, WorkflowStats};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag that stops repositories from being started once set.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    RepositoryListing,
    RunHistory,
    FileListing,
    FileContent,
    Parse,
    Rule,
}

/// A non-fatal problem met during the audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub repository: String,
    pub file: Option<String>,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    fn new(repository: &str, file: Option<&str>, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            repository: repository.to_string(),
            file: file.map(String::from),
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitStatus {
    Audited,
    RunsSkipped,
    Cancelled,
}

/// Result of auditing one repository.
#[derive(Debug)]
struct RepositoryAudit {
    index: usize,
    status: UnitStatus,
    records: Vec<RunRecord>,
    findings: Vec<FindingRow>,
    diagnostics: Vec<Diagnostic>,
    files_analyzed: usize,
    files_skipped: usize,
    degraded_documents: usize,
    rule_failures: usize,
}

impl RepositoryAudit {
    fn new(index: usize) -> Self {
        Self {
            index,
            status: UnitStatus::Audited,
            records: Vec::new(),
            findings: Vec::new(),
            diagnostics: Vec::new(),
            files_analyzed: 0,
            files_skipped: 0,
            degraded_documents: 0,
            rule_failures: 0,
        }
    }
}

/// Everything collected by one audit run.
#[derive(Debug, Clone)]
pub struct AuditOutcome {
    pub records: Vec<RunRecord>,
    pub stats: Vec<WorkflowStats>,
    pub findings: Vec<FindingRow>,
    pub diagnostics: Vec<Diagnostic>,
    pub coverage: Coverage,
    pub rule_order: Vec<&'static str>,
}

impl AuditOutcome {
    pub fn report(&self, options: &ReportOptions) -> AuditReport {
        render::render(
            &self.stats,
            &self.findings,
            &self.rule_order,
            self.coverage.clone(),
            options,
        )
    }

    /// Fold the result of owner expansion into coverage and diagnostics.
    pub fn record_owner_listing(&mut self, owners_requested: usize, diagnostics: Vec<Diagnostic>) {
        self.coverage.owners_requested = owners_requested;
        self.coverage.owners_skipped = diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::RepositoryListing)
            .count();
        self.diagnostics.splice(0..0, diagnostics);
    }

    pub fn stats_rows(&self) -> Vec<StatsRow> {
        self.stats.iter().map(StatsRow::from).collect()
    }
}

/// Fetches, analyzes and aggregates a set of repositories.
pub struct Auditor<'a, H: HostingApi + ?Sized> {
    api: &'a H,
    engine: &'a RuleEngine,
    config: &'a AuditConfig,
    cancel: CancellationFlag,
}

impl<'a, H: HostingApi + ?Sized> Auditor<'a, H> {
    pub fn new(api: &'a H, engine: &'a RuleEngine, config: &'a AuditConfig) -> Self {
        Self {
            api,
            engine,
            config,
            cancel: CancellationFlag::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Audit every repository with at most `config.concurrency` in flight.
    ///
    /// Returns after all repositories have finished or been skipped.
    pub async fn run(&self, repositories: &[String], now: DateTime<Utc>) -> AuditOutcome {
        log::info!(
            "Auditing {} repositories ({} at a time)",
            repositories.len(),
            self.config.concurrency
        );

        let mut units: Vec<RepositoryAudit> = stream::iter(repositories.iter().enumerate())
            .map(|(index, repository)| self.audit_repository(index, repository))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        units.sort_by_key(|unit| unit.index);

        let mut coverage = Coverage {
            repositories_requested: repositories.len(),
            cancelled: self.cancel.is_cancelled(),
            ..Coverage::default()
        };
        let mut records = Vec::new();
        let mut findings = Vec::new();
        let mut diagnostics = Vec::new();

        for unit in units {
            match unit.status {
                UnitStatus::Audited => coverage.repositories_audited += 1,
                UnitStatus::RunsSkipped => coverage.repositories_skipped += 1,
                UnitStatus::Cancelled => {
                    coverage.repositories_cancelled += 1;
                    continue;
                }
            }
            coverage.files_analyzed += unit.files_analyzed;
            coverage.files_skipped += unit.files_skipped;
            coverage.degraded_documents += unit.degraded_documents;
            coverage.rule_failures += unit.rule_failures;
            records.extend(unit.records);
            findings.extend(unit.findings);
            diagnostics.extend(unit.diagnostics);
        }

        let stats = stats::aggregate(&records, self.config.window_days, now);
        log::info!(
            "Audit finished: {} workflows, {} findings, {} diagnostics",
            stats.len(),
            findings.len(),
            diagnostics.len()
        );

        AuditOutcome {
            records,
            stats,
            findings,
            diagnostics,
            coverage,
            rule_order: self.engine.rule_ids(),
        }
    }

    async fn audit_repository(&self, index: usize, repository: &str) -> RepositoryAudit {
        let mut unit = RepositoryAudit::new(index);

        if self.cancel.is_cancelled() {
            unit.status = UnitStatus::Cancelled;
            return unit;
        }

        match self.api.list_run_records(repository, self.config.run_limit).await {
            Ok(records) => unit.records = records,
            Err(err) => {
                log::warn!("Skipping run history for {}: {}", repository, err);
                unit.status = UnitStatus::RunsSkipped;
                unit.diagnostics.push(Diagnostic::new(
                    repository,
                    None,
                    DiagnosticKind::RunHistory,
                    err.to_string(),
                ));
            }
        }

        let files = match self.api.list_definition_files(repository).await {
            Ok(files) => files,
            Err(err) => {
                log::warn!("Could not list workflow files for {}: {}", repository, err);
                unit.files_skipped += 1;
                unit.diagnostics.push(Diagnostic::new(
                    repository,
                    None,
                    DiagnosticKind::FileListing,
                    err.to_string(),
                ));
                return unit;
            }
        };

        for file in files.iter().filter(|f| is_definition_file(f)) {
            self.analyze_file(repository, file, &mut unit).await;
        }

        unit
    }

    async fn analyze_file(&self, repository: &str, file: &str, unit: &mut RepositoryAudit) {
        let content = match self.api.fetch_definition(repository, file).await {
            Ok(Some(content)) => content,
            Ok(None) => {
                unit.files_skipped += 1;
                unit.diagnostics.push(Diagnostic::new(
                    repository,
                    Some(file),
                    DiagnosticKind::FileContent,
                    "file not found",
                ));
                return;
            }
            Err(err) => {
                log::warn!("Skipping {}/{}: {}", repository, file, err);
                unit.files_skipped += 1;
                unit.diagnostics.push(Diagnostic::new(
                    repository,
                    Some(file),
                    DiagnosticKind::FileContent,
                    err.to_string(),
                ));
                return;
            }
        };

        let doc = WorkflowParser::parse(&content);
        log::debug!(
            "Parsed {}/{}: {} jobs, {} triggers",
            repository,
            file,
            doc.job_count(),
            doc.triggers.len()
        );

        if doc.degraded {
            unit.degraded_documents += 1;
            unit.diagnostics.push(Diagnostic::new(
                repository,
                Some(file),
                DiagnosticKind::Parse,
                doc.diagnostics.join("; "),
            ));
        }

        let evaluation = self.engine.evaluate_with_diagnostics(&doc, file);
        unit.files_analyzed += 1;
        unit.rule_failures += evaluation.failures.len();
        unit.diagnostics.extend(evaluation.failures.into_iter().map(|failure| {
            Diagnostic::new(
                repository,
                Some(file),
                DiagnosticKind::Rule,
                format!("{}: {}", failure.rule, failure.error),
            )
        }));
        unit.findings.extend(evaluation.findings.into_iter().map(|finding| FindingRow {
            repository: repository.to_string(),
            finding,
        }));
    }
}

/// Expand owners into their repositories and merge with explicit ones, first occurrence wins.
pub async fn resolve_repositories<H: HostingApi + ?Sized>(
    api: &H,
    owners: &[String],
    explicit: &[String],
) -> (Vec<String>, Vec<Diagnostic>) {
    let mut repositories: Vec<String> = Vec::new();
    let mut diagnostics = Vec::new();

    for owner in owners {
        match api.list_repositories(owner).await {
            Ok(repos) => {
                log::info!("Found {} repositories for {}", repos.len(), owner);
                repositories.extend(repos);
            }
            Err(err) => {
                log::warn!("Could not list repositories for {}: {}", owner, err);
                diagnostics.push(Diagnostic::new(
                    owner,
                    None,
                    DiagnosticKind::RepositoryListing,
                    err.to_string(),
                ));
            }
        }
    }
    repositories.extend(explicit.iter().cloned());

    let mut unique = Vec::with_capacity(repositories.len());
    for repo in repositories {
        if !unique.contains(&repo) {
            unique.push(repo);
        }
    }

    (unique, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{EXPENSIVE_RUNNER, NO_TIMEOUT};
    use crate::error::FetchError;
    use crate::stats::{RunConclusion, RunStatus};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;

    const MAC_CI: &str = "on: push\njobs:\n  build:\n    runs-on: macos-latest\n    timeout-minutes: 5\n";

    #[derive(Default)]
    struct FakeApi {
        owners: HashMap<String, Vec<String>>,
        runs: HashMap<String, Vec<RunRecord>>,
        files: HashMap<String, Vec<(String, Option<String>)>>,
        broken_files: Vec<String>,
        cancel_on_runs: Option<CancellationFlag>,
    }

    #[async_trait]
    impl HostingApi for FakeApi {
        async fn list_repositories(&self, owner: &str) -> Result<Vec<String>, FetchError> {
            self.owners
                .get(owner)
                .cloned()
                .ok_or_else(|| FetchError::Other(format!("no owner {owner}")))
        }

        async fn list_run_records(&self, repository: &str, limit: usize) -> Result<Vec<RunRecord>, FetchError> {
            if let Some(cancel) = &self.cancel_on_runs {
                cancel.cancel();
            }
            let runs = self
                .runs
                .get(repository)
                .ok_or_else(|| FetchError::Other("unauthorized".to_string()))?;
            Ok(runs.iter().take(limit).cloned().collect())
        }

        async fn list_definition_files(&self, repository: &str) -> Result<Vec<String>, FetchError> {
            Ok(self
                .files
                .get(repository)
                .map(|files| files.iter().map(|(name, _)| name.clone()).collect())
                .unwrap_or_default())
        }

        async fn fetch_definition(&self, repository: &str, file: &str) -> Result<Option<String>, FetchError> {
            if self.broken_files.iter().any(|f| f == file) {
                return Err(FetchError::Status {
                    url: file.to_string(),
                    status: 500,
                });
            }
            Ok(self
                .files
                .get(repository)
                .and_then(|files| files.iter().find(|(name, _)| name == file))
                .and_then(|(_, content)| content.clone()))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn record(repo: &str, event: &str) -> RunRecord {
        RunRecord {
            repository: repo.to_string(),
            workflow: "CI".to_string(),
            created_at: now() - Duration::days(1),
            status: RunStatus::Completed,
            conclusion: Some(RunConclusion::Success),
            trigger_event: event.to_string(),
        }
    }

    fn fleet() -> FakeApi {
        let mut api = FakeApi::default();
        api.runs.insert("acme/web".into(), vec![record("acme/web", "push"); 12]);
        api.runs.insert("acme/docs".into(), vec![record("acme/docs", "schedule"); 3]);
        api.files.insert(
            "acme/web".into(),
            vec![
                ("ci.yml".into(), Some(MAC_CI.into())),
                ("README.md".into(), Some("not yaml".into())),
                ("broken.yaml".into(), Some("on: push\njobs:\n  a: [unclosed\n".into())),
            ],
        );
        api.files.insert(
            "acme/docs".into(),
            vec![
                ("pages.yml".into(), Some("on: workflow_dispatch\njobs:\n  a:\n    runs-on: ubuntu-latest\n".into())),
                ("gone.yml".into(), None),
                ("flaky.yml".into(), Some(MAC_CI.into())),
            ],
        );
        api.broken_files.push("flaky.yml".into());
        api
    }

    #[tokio::test]
    async fn test_audit_collects_stats_and_findings() {
        let api = fleet();
        let config = AuditConfig::default();
        let engine = RuleEngine::builtin();
        let repos = vec!["acme/web".to_string(), "acme/docs".to_string()];

        let outcome = Auditor::new(&api, &engine, &config).run(&repos, now()).await;

        assert_eq!(outcome.stats.len(), 2);
        assert_eq!(outcome.stats[0].repository, "acme/web");
        assert_eq!(outcome.stats[0].triggers.push, 12);
        assert_eq!(outcome.stats[1].triggers.schedule, 3);

        assert!(outcome
            .findings
            .iter()
            .any(|row| row.repository == "acme/web" && row.finding.rule == EXPENSIVE_RUNNER));
        assert!(outcome
            .findings
            .iter()
            .any(|row| row.repository == "acme/docs" && row.finding.rule == NO_TIMEOUT));
        assert!(outcome.findings.iter().all(|row| row.finding.file != "README.md"));

        let coverage = &outcome.coverage;
        assert_eq!(coverage.repositories_audited, 2);
        assert_eq!(coverage.files_analyzed, 3);
        assert_eq!(coverage.files_skipped, 2);
        assert_eq!(coverage.degraded_documents, 1);
        assert!(!coverage.cancelled);

        let report = outcome.report(&ReportOptions::default());
        assert_eq!(report.push_dominant.len(), 1);
        assert_eq!(report.expensive_runners.on_all, 1);
    }

    #[tokio::test]
    async fn test_failed_run_history_is_skipped_not_fatal() {
        let mut api = fleet();
        api.runs.remove("acme/docs");
        let config = AuditConfig {
            concurrency: 1,
            ..AuditConfig::default()
        };
        let engine = RuleEngine::builtin();
        let repos = vec!["acme/docs".to_string(), "acme/web".to_string()];

        let outcome = Auditor::new(&api, &engine, &config).run(&repos, now()).await;

        assert_eq!(outcome.coverage.repositories_skipped, 1);
        assert_eq!(outcome.coverage.repositories_audited, 1);
        assert_eq!(outcome.stats.len(), 1);
        assert!(outcome
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::RunHistory && d.repository == "acme/docs"));
        assert!(outcome.findings.iter().any(|row| row.repository == "acme/docs"));
    }

    #[tokio::test]
    async fn test_cancelled_audit_skips_remaining_repositories() {
        let api = fleet();
        let config = AuditConfig::default();
        let engine = RuleEngine::builtin();
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let outcome = Auditor::new(&api, &engine, &config)
            .with_cancellation(cancel)
            .run(&["acme/web".to_string()], now())
            .await;

        assert!(outcome.coverage.cancelled);
        assert_eq!(outcome.coverage.repositories_cancelled, 1);
        assert!(outcome.stats.is_empty());
        assert!(outcome.findings.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_audit_finishes_running_repository() {
        let cancel = CancellationFlag::new();
        let mut api = fleet();
        api.cancel_on_runs = Some(cancel.clone());
        let config = AuditConfig {
            concurrency: 1,
            ..AuditConfig::default()
        };
        let engine = RuleEngine::builtin();
        let repos = vec!["acme/web".to_string(), "acme/docs".to_string()];

        let outcome = Auditor::new(&api, &engine, &config)
            .with_cancellation(cancel)
            .run(&repos, now())
            .await;

        let coverage = &outcome.coverage;
        assert!(coverage.cancelled);
        assert_eq!(coverage.repositories_audited, 1);
        assert_eq!(coverage.repositories_cancelled, 1);
        assert_eq!(coverage.files_analyzed, 2);

        assert_eq!(outcome.stats.len(), 1);
        assert_eq!(outcome.stats[0].repository, "acme/web");
        assert!(outcome
            .findings
            .iter()
            .any(|row| row.repository == "acme/web" && row.finding.rule == EXPENSIVE_RUNNER));
        assert!(outcome.findings.iter().all(|row| row.repository != "acme/docs"));
    }

    #[tokio::test]
    async fn test_output_order_matches_input_order() {
        let api = fleet();
        let config = AuditConfig {
            concurrency: 4,
            ..AuditConfig::default()
        };
        let engine = RuleEngine::builtin();
        let repos = vec!["acme/docs".to_string(), "acme/web".to_string()];

        let first = Auditor::new(&api, &engine, &config).run(&repos, now()).await;
        let second = Auditor::new(&api, &engine, &config).run(&repos, now()).await;

        assert_eq!(first.findings, second.findings);
        assert_eq!(first.findings[0].repository, "acme/docs");
        assert_eq!(first.stats_rows()[0].repository, "acme/docs");
    }

    #[tokio::test]
    async fn test_resolve_repositories() {
        let mut api = FakeApi::default();
        api.owners
            .insert("acme".into(), vec!["acme/web".into(), "acme/docs".into()]);

        let (repos, diagnostics) = resolve_repositories(
            &api,
            &["acme".to_string(), "ghost".to_string()],
            &["acme/web".to_string(), "other/tool".to_string()],
        )
        .await;

        assert_eq!(repos, vec!["acme/web", "acme/docs", "other/tool"]);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::RepositoryListing);
    }

    #[tokio::test]
    async fn test_failed_owner_listing_is_counted_in_coverage() {
        let mut api = fleet();
        api.owners
            .insert("acme".into(), vec!["acme/web".into(), "acme/docs".into()]);
        let config = AuditConfig::default();
        let engine = RuleEngine::builtin();
        let owners = vec!["acme".to_string(), "ghost".to_string()];

        let (repos, listing) = resolve_repositories(&api, &owners, &[]).await;
        let mut outcome = Auditor::new(&api, &engine, &config).run(&repos, now()).await;
        outcome.record_owner_listing(owners.len(), listing);

        assert_eq!(outcome.coverage.owners_requested, 2);
        assert_eq!(outcome.coverage.owners_skipped, 1);
        assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::RepositoryListing);
        assert_eq!(outcome.diagnostics[0].repository, "ghost");

        let report = outcome.report(&ReportOptions::default());
        assert_eq!(report.coverage.owners_skipped, 1);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["coverage"]["owners_skipped"], 1);
    }
}
