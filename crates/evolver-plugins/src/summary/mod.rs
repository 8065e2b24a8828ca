//! Run outputs written after a candidate is accepted.
//!
//! `summary.json` records the chosen plugin with provenance and is written
//! pretty-printed for people; `metrics.json` holds the merged metrics in
//! compact form for badges and dashboards.

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::EvolutionError;
use crate::orchestrator::Evolution;
use crate::protocol::Metrics;

/// File name of the run summary.
pub const SUMMARY_FILE_NAME: &str = "summary.json";

/// File name of the compact metrics document.
pub const METRICS_FILE_NAME: &str = "metrics.json";

/// Provenance record of an accepted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Registry name of the accepted plugin.
    pub chosen: String,
    /// Manifest version of the accepted plugin.
    pub version: String,
    /// Merged metrics of the accepted trial.
    pub metrics: Metrics,
    /// Unix time of the run in fractional seconds.
    pub timestamp: f64,
    /// Request kind that was served.
    pub request_api: String,
    /// Caller-supplied revision, empty when unknown.
    pub commit: String,
}

impl RunSummary {
    /// Summarises an accepted run, stamped with the current time.
    #[must_use]
    pub fn new(evolution: &Evolution, request_api: &str, commit: &str) -> Self {
        Self {
            chosen: evolution.chosen.clone(),
            version: evolution.version.clone(),
            metrics: evolution.metrics.clone(),
            timestamp: unix_now(),
            request_api: request_api.to_owned(),
            commit: commit.to_owned(),
        }
    }

    /// Writes `summary.json` and `metrics.json` into `output_dir`, creating
    /// the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`EvolutionError::Output`] if either file cannot be written.
    pub fn write(&self, output_dir: &Path) -> Result<(), EvolutionError> {
        fs::create_dir_all(output_dir).map_err(|err| EvolutionError::output(output_dir, err))?;

        let summary_path = output_dir.join(SUMMARY_FILE_NAME);
        let summary = serde_json::to_vec_pretty(self)
            .map_err(|err| EvolutionError::output(&summary_path, err.into()))?;
        fs::write(&summary_path, summary)
            .map_err(|err| EvolutionError::output(&summary_path, err))?;

        let metrics_path = output_dir.join(METRICS_FILE_NAME);
        let metrics = serde_json::to_vec(&self.metrics)
            .map_err(|err| EvolutionError::output(&metrics_path, err.into()))?;
        fs::write(&metrics_path, metrics)
            .map_err(|err| EvolutionError::output(&metrics_path, err))
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |elapsed| elapsed.as_secs_f64())
}
