//! Error types for the CLI runtime.

use std::io;
use std::process::ExitCode;

use evolver_plugins::DocumentError;
use thiserror::Error;

use crate::telemetry::TelemetryError;

/// Exit status for usage errors and unreadable inputs.
pub(crate) const USAGE_EXIT: u8 = 2;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("failed to load request: {0}")]
    LoadRequest(DocumentError),
    #[error("failed to load policy: {0}")]
    LoadPolicy(DocumentError),
    #[error("failed to serialise report: {0}")]
    SerialiseReport(serde_json::Error),
    #[error("failed to emit report: {0}")]
    EmitReport(io::Error),
}

impl AppError {
    /// Exit status reported for this error.
    pub(crate) fn exit_code(&self) -> ExitCode {
        match self {
            Self::CliUsage(_) | Self::Telemetry(_) | Self::LoadRequest(_) | Self::LoadPolicy(_) => {
                ExitCode::from(USAGE_EXIT)
            }
            Self::SerialiseReport(_) | Self::EmitReport(_) => ExitCode::FAILURE,
        }
    }
}
