//! Rendering of the run report written to stdout.
//!
//! A successful run reports the chosen plugin, its merged metrics and
//! artifacts, and the candidates that were tried. A failed run reports one
//! error record per rejected candidate, followed by a run-level record when
//! the run stopped for another reason. An output failure after acceptance
//! also names the chosen plugin.

use std::io::Write;
use std::process::ExitCode;

use evolver_plugins::{
    Artifacts, CandidateFailure, Evolution, EvolutionError, Metrics, TrialWarning,
};
use serde::Serialize;

use crate::errors::AppError;

/// Report emitted once per run.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub(crate) enum Report<'a> {
    Ok {
        chosen: &'a str,
        version: &'a str,
        artifacts: &'a Artifacts,
        metrics: &'a Metrics,
        tried: &'a [String],
        warnings: &'a [TrialWarning],
        failures: &'a [CandidateFailure],
    },
    Failed {
        #[serde(skip_serializing_if = "Option::is_none")]
        chosen: Option<&'a str>,
        errors: Vec<ErrorRecord<'a>>,
        warnings: &'a [TrialWarning],
    },
}

/// One entry in a failed report's `errors` list.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum ErrorRecord<'a> {
    Candidate(&'a CandidateFailure),
    Run { error: &'static str, detail: String },
}

impl ErrorRecord<'_> {
    fn run(kind: &'static str, error: &EvolutionError) -> Self {
        Self::Run {
            error: kind,
            detail: error.to_string(),
        }
    }
}

impl<'a> Report<'a> {
    /// Builds the report for an evolution outcome.
    pub(crate) fn from_outcome(outcome: &'a Result<Evolution, EvolutionError>) -> Self {
        match outcome {
            Ok(evolution) => Self::Ok {
                chosen: &evolution.chosen,
                version: &evolution.version,
                artifacts: &evolution.artifacts,
                metrics: &evolution.metrics,
                tried: &evolution.tried,
                warnings: &evolution.warnings,
                failures: &evolution.failures,
            },
            Err(EvolutionError::Exhausted { failures, warnings }) => Self::Failed {
                chosen: None,
                errors: failures.iter().map(ErrorRecord::Candidate).collect(),
                warnings,
            },
            Err(error @ EvolutionError::NoCandidates(_)) => Self::Failed {
                chosen: None,
                errors: vec![ErrorRecord::run("no-candidates", error)],
                warnings: &[],
            },
            Err(
                error @ EvolutionError::Output {
                    failures,
                    warnings,
                    accepted,
                    ..
                },
            ) => Self::Failed {
                chosen: accepted.as_deref().map(|evolution| evolution.chosen.as_str()),
                errors: failures
                    .iter()
                    .map(ErrorRecord::Candidate)
                    .chain(std::iter::once(ErrorRecord::run("output", error)))
                    .collect(),
                warnings,
            },
        }
    }

    /// Exit status matching the report.
    pub(crate) const fn exit_code(&self) -> ExitCode {
        match self {
            Self::Ok { .. } => ExitCode::SUCCESS,
            Self::Failed { .. } => ExitCode::FAILURE,
        }
    }
}

/// Writes `report` to `out` as pretty JSON followed by a newline.
pub(crate) fn write_report<W: Write>(report: &Report<'_>, out: &mut W) -> Result<(), AppError> {
    serde_json::to_writer_pretty(&mut *out, report).map_err(AppError::SerialiseReport)?;
    out.write_all(b"\n").map_err(AppError::EmitReport)?;
    out.flush().map_err(AppError::EmitReport)
}
