//! Run summary collected by the orchestration loop.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to serialize run report: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write run report to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One return to a passing state. `scenario` is `None` for the baseline run
/// before any fault was injected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recovery {
    pub scenario: Option<String>,
    pub retries: u32,
    pub seconds: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub test_runs: u64,
    pub failed_runs: u64,
    pub scenarios_applied: u64,
    pub scenario_failures: u64,
    pub retries_exhausted: u64,
    pub recoveries: Vec<Recovery>,
}

impl RunReport {
    pub fn record_recovery(&mut self, scenario: Option<String>, retries: u32, elapsed: Duration) {
        self.recoveries.push(Recovery {
            scenario,
            retries,
            seconds: elapsed.as_secs_f64(),
        });
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.recoveries.iter().map(|recovery| recovery.retries).max()
    }

    pub fn mean_recovery_secs(&self) -> Option<f64> {
        if self.recoveries.is_empty() {
            return None;
        }
        let total: f64 = self.recoveries.iter().map(|recovery| recovery.seconds).sum();
        Some(total / self.recoveries.len() as f64)
    }

    pub fn log_summary(&self) {
        tracing::info!(
            test_runs = self.test_runs,
            failed_runs = self.failed_runs,
            scenarios_applied = self.scenarios_applied,
            scenario_failures = self.scenario_failures,
            retries_exhausted = self.retries_exhausted,
            recoveries = self.recoveries.len(),
            max_retries = ?self.max_retries(),
            mean_recovery_secs = ?self.mean_recovery_secs(),
            "run summary"
        );
    }

    pub fn write_json(&self, path: &Path) -> Result<(), ReportError> {
        let body =
            serde_json::to_string_pretty(self).map_err(|source| ReportError::Serialize { source })?;
        fs::write(path, body).map_err(|source| ReportError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
