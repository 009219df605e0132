use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    #[serde(other)]
    Other,
}

/// Final outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    Cancelled,
    Skipped,
    TimedOut,
    ActionRequired,
    Neutral,
    Stale,
    StartupFailure,
    #[serde(other)]
    Other,
}

/// One workflow execution, normalized from the hosting API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub repository: String,
    pub workflow: String,
    pub created_at: DateTime<Utc>,
    pub status: RunStatus,
    pub conclusion: Option<RunConclusion>,
    pub trigger_event: String,
}

/// Trigger buckets; every event outside the four named ones lands in `other`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerCounts {
    pub push: usize,
    pub pull_request: usize,
    pub schedule: usize,
    pub workflow_dispatch: usize,
    pub other: usize,
}

impl TriggerCounts {
    pub fn record(&mut self, event: &str) {
        match event {
            "push" => self.push += 1,
            "pull_request" => self.pull_request += 1,
            "schedule" => self.schedule += 1,
            "workflow_dispatch" => self.workflow_dispatch += 1,
            _ => self.other += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.push + self.pull_request + self.schedule + self.workflow_dispatch + self.other
    }
}

/// Run statistics for one (repository, workflow) pair over a trailing window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStats {
    pub repository: String,
    pub workflow: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub triggers: TriggerCounts,
}

impl WorkflowStats {
    fn empty(repository: &str, workflow: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            repository: repository.to_string(),
            workflow: workflow.to_string(),
            window_start: start,
            window_end: end,
            total: 0,
            failed: 0,
            cancelled: 0,
            triggers: TriggerCounts::default(),
        }
    }

    fn record(&mut self, run: &RunRecord) {
        self.total += 1;
        match run.conclusion {
            Some(RunConclusion::Failure) => self.failed += 1,
            Some(RunConclusion::Cancelled) => self.cancelled += 1,
            _ => {}
        }
        self.triggers.record(&run.trigger_event);
    }

    fn ratio(&self, count: usize) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            count as f64 / self.total as f64
        }
    }

    pub fn failure_rate(&self) -> f64 {
        self.ratio(self.failed)
    }

    pub fn cancellation_rate(&self) -> f64 {
        self.ratio(self.cancelled)
    }

    pub fn push_fraction(&self) -> f64 {
        self.ratio(self.triggers.push)
    }
}

/// One row of the statistics dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsRow {
    pub repository: String,
    pub workflow: String,
    pub total: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub push: usize,
    pub pull_request: usize,
    pub schedule: usize,
    pub workflow_dispatch: usize,
    pub other: usize,
}

impl From<&WorkflowStats> for StatsRow {
    fn from(stats: &WorkflowStats) -> Self {
        Self {
            repository: stats.repository.clone(),
            workflow: stats.workflow.clone(),
            total: stats.total,
            failed: stats.failed,
            cancelled: stats.cancelled,
            push: stats.triggers.push,
            pull_request: stats.triggers.pull_request,
            schedule: stats.triggers.schedule,
            workflow_dispatch: stats.triggers.workflow_dispatch,
            other: stats.triggers.other,
        }
    }
}

/// Group runs created strictly after `now - window_days` by repository and workflow.
///
/// Groups appear in first-seen order; groups without runs in the window are omitted.
pub fn aggregate(records: &[RunRecord], window_days: u32, now: DateTime<Utc>) -> Vec<WorkflowStats> {
    let window_start = now - Duration::days(i64::from(window_days));
    let mut groups: IndexMap<(&str, &str), WorkflowStats> = IndexMap::new();

    for run in records.iter().filter(|r| r.created_at > window_start) {
        groups
            .entry((run.repository.as_str(), run.workflow.as_str()))
            .or_insert_with(|| WorkflowStats::empty(&run.repository, &run.workflow, window_start, now))
            .record(run);
    }

    log::debug!(
        "Aggregated {} runs into {} workflow groups",
        records.len(),
        groups.len()
    );

    groups.into_values().collect()
}
