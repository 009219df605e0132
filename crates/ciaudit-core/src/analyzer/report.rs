use crate::error::RuleError;
use serde::{Deserialize, Serialize};

/// Severity level for audit findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Info,
}

impl Severity {
    pub fn priority(&self) -> u8 {
        match self {
            Severity::Warning => 2,
            Severity::Info => 1,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

/// What a rule reports before the engine attaches the rule id and file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub severity: Severity,
    pub message: String,
    pub tag: Option<String>,
}

impl Detection {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            tag: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// A single detected anti-pattern instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub file: String,
    /// Sub-classification within a rule, e.g. `MACOS_10X` for expensive runners.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl Finding {
    pub fn from_detection(rule: &str, file: &str, detection: Detection) -> Self {
        Self {
            rule: rule.to_string(),
            severity: detection.severity,
            message: detection.message,
            file: file.to_string(),
            tag: detection.tag,
        }
    }
}

/// One row of the findings dataset: a finding and the repository it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingRow {
    pub repository: String,
    #[serde(flatten)]
    pub finding: Finding,
}

/// A rule that failed while evaluating one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailure {
    pub rule: String,
    pub file: String,
    pub error: RuleError,
}

/// Rule engine output for one document.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub findings: Vec<Finding>,
    pub failures: Vec<RuleFailure>,
}

/// Analysis of one workflow file, as shown by `ciaudit lint`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub file: String,
    pub workflow_name: Option<String>,
    pub job_count: usize,
    pub step_count: usize,
    pub degraded: bool,
    pub diagnostics: Vec<String>,
    pub findings: Vec<Finding>,
    pub rule_failures: Vec<String>,
}

impl FileAnalysis {
    pub fn warning_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .count()
    }

    pub fn info_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Info)
            .count()
    }
}

/// A local file that could not be read during `ciaudit lint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub file: String,
    pub reason: String,
}

/// Analyses of every readable file plus the files that were skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LintRun {
    pub analyses: Vec<FileAnalysis>,
    pub skipped: Vec<SkippedFile>,
}
