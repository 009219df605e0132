use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".ciaudit.toml";

/// Audit limits and report thresholds, loaded from `.ciaudit.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Trailing window for run statistics.
    pub window_days: u32,
    /// Runs fetched per repository.
    pub run_limit: usize,
    /// Entries in the busiest-workflows section.
    pub top_n: usize,
    /// Scheduled runs above which a workflow counts as schedule-heavy.
    pub schedule_threshold: usize,
    /// Repositories audited at the same time.
    pub concurrency: usize,
    pub push_dominant_ratio: f64,
    pub push_dominant_min_runs: usize,
    pub failure_ratio: f64,
    pub cancel_ratio: f64,
    /// Minimum runs for the failure and cancellation sections.
    pub min_runs: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            run_limit: 100,
            top_n: 20,
            schedule_threshold: 20,
            concurrency: 8,
            push_dominant_ratio: 0.7,
            push_dominant_min_runs: 10,
            failure_ratio: 0.3,
            cancel_ratio: 0.2,
            min_runs: 5,
        }
    }
}

impl AuditConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: AuditConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else `.ciaudit.toml` when present, else defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_days == 0 {
            return Err(ConfigError::Invalid {
                field: "window_days",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        for (field, value) in [
            ("push_dominant_ratio", self.push_dominant_ratio),
            ("failure_ratio", self.failure_ratio),
            ("cancel_ratio", self.cancel_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} is outside [0, 1]"),
                });
            }
        }
        Ok(())
    }
}
