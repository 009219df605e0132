pub mod analyzer;
pub mod audit;
pub mod config;
pub mod discovery;
pub mod error;
pub mod parser;
pub mod providers;
pub mod render;
pub mod stats;

pub use analyzer::report::{Finding, FindingRow, Severity};
pub use analyzer::RuleEngine;
pub use audit::{Auditor, AuditOutcome, CancellationFlag};
pub use config::AuditConfig;
pub use parser::document::PipelineDocument;
pub use parser::github::WorkflowParser;
pub use providers::github_api::GitHubClient;
pub use providers::HostingApi;
pub use render::AuditReport;
pub use stats::{RunRecord, WorkflowStats};
