pub mod job_rules;
pub mod report;
pub mod runner_rules;
pub mod step_rules;
pub mod trigger_rules;

use crate::error::RuleError;
use crate::parser::document::PipelineDocument;
use crate::parser::github::WorkflowParser;
use report::{Detection, Evaluation, FileAnalysis, Finding, LintRun, RuleFailure, SkippedFile};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Signature every detection rule implements.
pub type RuleFn = fn(&PipelineDocument) -> Result<Vec<Detection>, RuleError>;

/// A registered detection rule.
#[derive(Debug, Clone, Copy)]
pub struct RuleDescriptor {
    pub id: &'static str,
    pub summary: &'static str,
    pub evaluate: RuleFn,
}

pub const PUSH_ALL_BRANCHES: &str = "PUSH_ALL_BRANCHES";
pub const NO_CONCURRENCY: &str = "NO_CONCURRENCY";
pub const MATRIX_NO_FAILFAST: &str = "MATRIX_NO_FAILFAST";
pub const LARGE_MATRIX: &str = "LARGE_MATRIX";
pub const FREQUENT_SCHEDULE: &str = "FREQUENT_SCHEDULE";
pub const NO_TIMEOUT: &str = "NO_TIMEOUT";
pub const ARTIFACT_NO_RETENTION: &str = "ARTIFACT_NO_RETENTION";
pub const OLD_CHECKOUT: &str = "OLD_CHECKOUT";
pub const NO_CACHE: &str = "NO_CACHE";
pub const PR_ALL_EVENTS: &str = "PR_ALL_EVENTS";
pub const EXPENSIVE_RUNNER: &str = "EXPENSIVE_RUNNER";

/// Built-in rules in report order.
pub const BUILTIN_RULES: &[RuleDescriptor] = &[
    RuleDescriptor {
        id: PUSH_ALL_BRANCHES,
        summary: "push trigger without branch or path filters",
        evaluate: trigger_rules::push_all_branches,
    },
    RuleDescriptor {
        id: NO_CONCURRENCY,
        summary: "push/pull_request workflow without a concurrency group",
        evaluate: trigger_rules::no_concurrency,
    },
    RuleDescriptor {
        id: MATRIX_NO_FAILFAST,
        summary: "matrix job without an explicit fail-fast setting",
        evaluate: job_rules::matrix_no_failfast,
    },
    RuleDescriptor {
        id: LARGE_MATRIX,
        summary: "matrix with more than two dimensions",
        evaluate: job_rules::large_matrix,
    },
    RuleDescriptor {
        id: FREQUENT_SCHEDULE,
        summary: "cron schedule firing every minute or every few minutes",
        evaluate: trigger_rules::frequent_schedule,
    },
    RuleDescriptor {
        id: NO_TIMEOUT,
        summary: "job without timeout-minutes",
        evaluate: job_rules::no_timeout,
    },
    RuleDescriptor {
        id: ARTIFACT_NO_RETENTION,
        summary: "artifact upload without retention-days",
        evaluate: step_rules::artifact_no_retention,
    },
    RuleDescriptor {
        id: OLD_CHECKOUT,
        summary: "actions/checkout pinned to v1 or v2",
        evaluate: step_rules::old_checkout,
    },
    RuleDescriptor {
        id: NO_CACHE,
        summary: "dependency install without any cache",
        evaluate: step_rules::no_cache,
    },
    RuleDescriptor {
        id: PR_ALL_EVENTS,
        summary: "pull_request trigger without an event-type list",
        evaluate: trigger_rules::pr_all_events,
    },
    RuleDescriptor {
        id: EXPENSIVE_RUNNER,
        summary: "macOS or Windows runners outside protected branches",
        evaluate: runner_rules::expensive_runner,
    },
];

/// Ordered registry of independent detection rules.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<RuleDescriptor>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RuleEngine {
    /// An engine holding every built-in rule.
    pub fn builtin() -> Self {
        Self {
            rules: BUILTIN_RULES.to_vec(),
        }
    }

    /// The shared, read-only engine with the built-in rules.
    pub fn global() -> &'static RuleEngine {
        static ENGINE: OnceLock<RuleEngine> = OnceLock::new();
        ENGINE.get_or_init(RuleEngine::builtin)
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule after the existing ones.
    pub fn with_rule(mut self, rule: RuleDescriptor) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[RuleDescriptor] {
        &self.rules
    }

    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id).collect()
    }

    /// Run every rule against `doc` and return findings in registration order.
    pub fn evaluate(&self, doc: &PipelineDocument, file: &str) -> Vec<Finding> {
        self.evaluate_with_diagnostics(doc, file).findings
    }

    /// Like [`RuleEngine::evaluate`], also reporting rules that errored or panicked.
    pub fn evaluate_with_diagnostics(&self, doc: &PipelineDocument, file: &str) -> Evaluation {
        let mut evaluation = Evaluation::default();

        for rule in &self.rules {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (rule.evaluate)(doc)))
                .unwrap_or_else(|payload| Err(RuleError::Panicked(panic_message(payload.as_ref()))));

            match outcome {
                Ok(detections) => evaluation.findings.extend(
                    detections
                        .into_iter()
                        .map(|d| Finding::from_detection(rule.id, file, d)),
                ),
                Err(error) => {
                    log::warn!("Rule {} skipped for {}: {}", rule.id, file, error);
                    evaluation.failures.push(RuleFailure {
                        rule: rule.id.to_string(),
                        file: file.to_string(),
                        error,
                    });
                }
            }
        }

        evaluation
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run the global rule engine on a parsed document and summarize the result.
pub fn analyze(doc: &PipelineDocument, file: &str) -> FileAnalysis {
    let evaluation = RuleEngine::global().evaluate_with_diagnostics(doc, file);

    FileAnalysis {
        file: file.to_string(),
        workflow_name: doc.name.clone(),
        job_count: doc.job_count(),
        step_count: doc.step_count(),
        degraded: doc.degraded,
        diagnostics: doc.diagnostics.clone(),
        findings: evaluation.findings,
        rule_failures: evaluation
            .failures
            .iter()
            .map(|f| format!("{}: {}", f.rule, f.error))
            .collect(),
    }
}

/// Analyze local workflow files, skipping the ones that cannot be read.
pub fn lint_files(files: &[PathBuf]) -> LintRun {
    let mut run = LintRun::default();

    for file in files {
        let name = file.display().to_string();
        match WorkflowParser::parse_file(file) {
            Ok(doc) => run.analyses.push(analyze(&doc, &name)),
            Err(err) => {
                log::warn!("Skipping {}: {:#}", name, err);
                run.skipped.push(SkippedFile {
                    file: name,
                    reason: format!("{err:#}"),
                });
            }
        }
    }

    run
}
