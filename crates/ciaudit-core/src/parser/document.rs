use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The event class a workflow trigger responds to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Push,
    PullRequest,
    Schedule,
    WorkflowDispatch,
    Other(String),
}

impl TriggerKind {
    pub fn from_event(event: &str) -> Self {
        match event {
            "push" => TriggerKind::Push,
            "pull_request" => TriggerKind::PullRequest,
            "schedule" => TriggerKind::Schedule,
            "workflow_dispatch" => TriggerKind::WorkflowDispatch,
            other => TriggerKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TriggerKind::Push => "push",
            TriggerKind::PullRequest => "pull_request",
            TriggerKind::Schedule => "schedule",
            TriggerKind::WorkflowDispatch => "workflow_dispatch",
            TriggerKind::Other(name) => name,
        }
    }
}

/// Branch, path and event-type filters attached to a trigger.
///
/// `None` means the key was absent; `Some(vec![])` means it was present but empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerFilters {
    pub branches: Option<Vec<String>>,
    pub branches_ignore: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub paths: Option<Vec<String>>,
    pub paths_ignore: Option<Vec<String>>,
    pub types: Option<Vec<String>>,
}

impl TriggerFilters {
    pub fn has_branch_or_path_filter(&self) -> bool {
        self.branches.is_some() || self.paths.is_some() || self.paths_ignore.is_some()
    }

    /// True when the `branches` filter explicitly names `main` or `master`.
    pub fn names_protected_branch(&self) -> bool {
        self.branches
            .as_ref()
            .is_some_and(|branches| branches.iter().any(|b| b == "main" || b == "master"))
    }
}

/// A single declared trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub filters: TriggerFilters,
    /// Cron expressions, only populated for `schedule`.
    pub crons: Vec<String>,
}

impl Trigger {
    pub fn new(kind: TriggerKind) -> Self {
        Self {
            kind,
            filters: TriggerFilters::default(),
            crons: Vec::new(),
        }
    }
}

/// A `concurrency:` declaration, either the short string form or the mapping form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concurrency {
    pub group: String,
    pub cancel_in_progress: Option<bool>,
}

/// `timeout-minutes` as written: a literal or an expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeout {
    Minutes(u64),
    Expression(String),
}

/// Matrix strategy for a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixStrategy {
    /// Dimension name to values; `include`/`exclude` are not dimensions.
    pub dimensions: BTreeMap<String, Vec<String>>,
    /// Set when the matrix is produced by an expression (e.g. `fromJSON(...)`).
    pub dynamic: bool,
}

impl MatrixStrategy {
    pub fn dimension_count(&self) -> usize {
        self.dimensions.len()
    }

    pub fn total_combinations(&self) -> usize {
        self.dimensions.values().map(Vec::len).product()
    }
}

/// Represents a single step within a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: Option<String>,
    pub uses: Option<String>,
    pub run: Option<String>,
    /// The `with:` block, values stringified.
    pub with: BTreeMap<String, String>,
}

impl StepSpec {
    pub fn action_ref(&self) -> Option<&str> {
        self.uses.as_deref()
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.with
    }

    /// The action name without its `@version` suffix.
    pub fn action_name(&self) -> Option<&str> {
        self.uses
            .as_deref()
            .map(|uses| uses.split('@').next().unwrap_or(uses))
    }

    pub fn label(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.uses.clone())
            .unwrap_or_else(|| "unnamed step".to_string())
    }
}

/// A job as declared under `jobs:`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: String,
    pub name: Option<String>,
    /// Runner labels with matrix expressions already expanded.
    pub runs_on: Vec<String>,
    pub condition: Option<String>,
    pub timeout: Option<Timeout>,
    pub concurrency: Option<Concurrency>,
    pub matrix: Option<MatrixStrategy>,
    pub fail_fast: Option<bool>,
    /// Reusable workflow reference for `jobs.<id>.uses`.
    pub uses: Option<String>,
    pub steps: Vec<StepSpec>,
}

impl JobSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn timeout_minutes(&self) -> Option<u64> {
        match self.timeout {
            Some(Timeout::Minutes(minutes)) => Some(minutes),
            _ => None,
        }
    }

    pub fn has_timeout(&self) -> bool {
        self.timeout.is_some()
    }

    pub fn matrix_dimensions(&self) -> Option<&BTreeMap<String, Vec<String>>> {
        self.matrix.as_ref().map(|m| &m.dimensions)
    }

    pub fn fail_fast(&self) -> Option<bool> {
        self.fail_fast
    }

    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    pub fn is_reusable_call(&self) -> bool {
        self.uses.is_some()
    }
}

/// Parsed representation of one workflow definition file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDocument {
    pub name: Option<String>,
    pub triggers: Vec<Trigger>,
    pub concurrency: Option<Concurrency>,
    pub jobs: Vec<JobSpec>,
    /// A `retention-days` key appears somewhere in the document.
    pub retention_declared: bool,
    /// Some sections could not be parsed and were skipped.
    pub degraded: bool,
    pub diagnostics: Vec<String>,
}

impl PipelineDocument {
    pub fn trigger(&self, kind: &TriggerKind) -> Option<&Trigger> {
        self.triggers.iter().find(|t| &t.kind == kind)
    }

    pub fn has_trigger(&self, kind: &TriggerKind) -> bool {
        self.trigger(kind).is_some()
    }

    /// Filters declared on a trigger; empty when the trigger is absent or unfiltered.
    pub fn trigger_filters(&self, kind: &TriggerKind) -> TriggerFilters {
        self.trigger(kind)
            .map(|t| t.filters.clone())
            .unwrap_or_default()
    }

    /// Workflow-level or any job-level concurrency group.
    pub fn has_concurrency_group(&self) -> bool {
        self.concurrency.is_some() || self.jobs.iter().any(|j| j.concurrency.is_some())
    }

    pub fn jobs(&self) -> &[JobSpec] {
        &self.jobs
    }

    pub fn get_job(&self, id: &str) -> Option<&JobSpec> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn steps(&self) -> impl Iterator<Item = (&JobSpec, &StepSpec)> {
        self.jobs
            .iter()
            .flat_map(|job| job.steps.iter().map(move |step| (job, step)))
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn step_count(&self) -> usize {
        self.jobs.iter().map(|j| j.steps.len()).sum()
    }
}
