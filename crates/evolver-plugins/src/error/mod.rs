//! Domain errors raised by orchestration stages.
//!
//! All errors use `thiserror`-derived enums with structured context so callers
//! can inspect the failure programmatically. I/O and JSON errors are wrapped in
//! `Arc` so the enums stay cheap to clone into trial records and satisfy the
//! `result_large_err` Clippy lint.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::ChainWarning;
use crate::orchestrator::{CandidateFailure, Evolution, TrialWarning};

/// Errors raised while loading a JSON document from disk.
#[derive(Debug, Clone, Error)]
pub enum DocumentError {
    /// The file could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The file contents are not a valid document of the expected shape.
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: Arc<serde_json::Error>,
    },
}

impl DocumentError {
    pub(crate) fn read(path: &Path, source: std::io::Error) -> Self {
        Self::Read {
            path: path.to_path_buf(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn parse(path: &Path, source: serde_json::Error) -> Self {
        Self::Parse {
            path: path.to_path_buf(),
            source: Arc::new(source),
        }
    }

    /// Returns the path of the offending document.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } => path,
        }
    }
}

/// Classification of a failed plugin execution.
///
/// The kind is what the orchestrator records against a candidate; the full
/// [`ExecutionError`] carries the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionErrorKind {
    /// The process could not be started or communicated with.
    #[serde(rename = "spawn-failure")]
    SpawnFailure,
    /// The process outlived its wall-clock budget and was killed.
    #[serde(rename = "timeout")]
    Timeout,
    /// The process exited with a non-zero status.
    #[serde(rename = "nonzero-exit")]
    NonZeroExit,
    /// The process output could not be interpreted at all.
    #[serde(rename = "malformed-reply")]
    MalformedReply,
    /// The process exited cleanly but replied with an error status.
    #[serde(rename = "reported-error")]
    ReportedError,
}

impl ExecutionErrorKind {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SpawnFailure => "spawn-failure",
            Self::Timeout => "timeout",
            Self::NonZeroExit => "nonzero-exit",
            Self::MalformedReply => "malformed-reply",
            Self::ReportedError => "reported-error",
        }
    }
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors arising from a single plugin execution.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// The plugin process could not be spawned.
    #[error("plugin '{name}' failed to start: {message}")]
    SpawnFailed {
        /// Plugin name.
        name: String,
        /// Human-readable failure description.
        message: String,
        /// Optional underlying I/O error.
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// The plugin did not complete within its time limit.
    #[error("plugin '{name}' timed out after {}s", .limit.as_secs_f64())]
    Timeout {
        /// Plugin name.
        name: String,
        /// Time limit that was exceeded.
        limit: Duration,
    },

    /// The plugin exited with a non-zero status code.
    #[error("plugin '{name}' exited with non-zero status {status}")]
    NonZeroExit {
        /// Plugin name.
        name: String,
        /// Process exit status, `-1` when terminated by a signal.
        status: i32,
        /// Captured standard error output.
        stderr: String,
    },

    /// The plugin produced output that cannot be interpreted even as text.
    #[error("plugin '{name}' wrote a malformed reply: {message}")]
    MalformedReply {
        /// Plugin name.
        name: String,
        /// Description of the problem.
        message: String,
    },

    /// The plugin replied with an explicit error status.
    #[error("plugin '{name}' reported an error: {detail}")]
    Reported {
        /// Plugin name.
        name: String,
        /// Error payload supplied by the plugin.
        detail: serde_json::Value,
    },

    /// An I/O error occurred while communicating with the plugin process.
    #[error("I/O error communicating with plugin '{name}': {source}")]
    Io {
        /// Plugin name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl ExecutionError {
    /// Returns the classification recorded against a candidate.
    #[must_use]
    pub const fn kind(&self) -> ExecutionErrorKind {
        match self {
            Self::SpawnFailed { .. } | Self::Io { .. } => ExecutionErrorKind::SpawnFailure,
            Self::Timeout { .. } => ExecutionErrorKind::Timeout,
            Self::NonZeroExit { .. } => ExecutionErrorKind::NonZeroExit,
            Self::MalformedReply { .. } => ExecutionErrorKind::MalformedReply,
            Self::Reported { .. } => ExecutionErrorKind::ReportedError,
        }
    }

    /// Returns the name of the plugin that failed.
    #[must_use]
    pub fn plugin(&self) -> &str {
        match self {
            Self::SpawnFailed { name, .. }
            | Self::Timeout { name, .. }
            | Self::NonZeroExit { name, .. }
            | Self::MalformedReply { name, .. }
            | Self::Reported { name, .. }
            | Self::Io { name, .. } => name,
        }
    }

    pub(crate) fn io(name: &str, source: std::io::Error) -> Self {
        Self::Io {
            name: name.to_owned(),
            source: Arc::new(source),
        }
    }
}

/// No registry entry satisfies a request's requirements.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no plugin matches api={api} capabilities={}", format_capabilities(.capabilities))]
pub struct NoCandidatesError {
    /// Requested request kind.
    pub api: String,
    /// Requested capability tags.
    pub capabilities: BTreeSet<String>,
}

fn format_capabilities(capabilities: &BTreeSet<String>) -> String {
    let joined: Vec<&str> = capabilities.iter().map(String::as_str).collect();
    format!("[{}]", joined.join(","))
}

/// A chain step marked `required` could not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("required chain step '{plugin}' failed: {detail}")]
pub struct ChainFailure {
    /// Dependent plugin of the failed step.
    pub plugin: String,
    /// Failure description.
    pub detail: String,
    /// Warnings from optional steps that ran before it.
    pub warnings: Vec<ChainWarning>,
}

/// Top-level failures of an orchestration run.
#[derive(Debug, Clone, Error)]
pub enum EvolutionError {
    /// Selection produced no eligible candidates; nothing was executed.
    #[error(transparent)]
    NoCandidates(#[from] NoCandidatesError),

    /// Every eligible candidate was tried and rejected.
    #[error("all {} candidate(s) were rejected", .failures.len())]
    Exhausted {
        /// One record per rejected candidate, in trial order.
        failures: Vec<CandidateFailure>,
        /// Non-fatal warnings gathered along the way.
        warnings: Vec<TrialWarning>,
    },

    /// An output directory or file could not be written.
    ///
    /// The run stops where it was; the trail gathered so far is kept.
    #[error("failed to write run output {}: {source}", .path.display())]
    Output {
        /// File that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
        /// Candidates rejected before the write failed.
        failures: Vec<CandidateFailure>,
        /// Warnings gathered before the write failed.
        warnings: Vec<TrialWarning>,
        /// The accepted run whose summary could not be written, if any.
        accepted: Option<Box<Evolution>>,
    },
}

impl EvolutionError {
    pub(crate) fn output(path: &Path, source: std::io::Error) -> Self {
        Self::Output {
            path: path.to_path_buf(),
            source: Arc::new(source),
            failures: Vec::new(),
            warnings: Vec::new(),
            accepted: None,
        }
    }

    /// Attaches the run's trail to an output failure. Other variants are
    /// returned unchanged.
    pub(crate) fn with_trail(
        self,
        failures: Vec<CandidateFailure>,
        warnings: Vec<TrialWarning>,
        accepted: Option<Evolution>,
    ) -> Self {
        match self {
            Self::Output { path, source, .. } => Self::Output {
                path,
                source,
                failures,
                warnings,
                accepted: accepted.map(Box::new),
            },
            other => other,
        }
    }
}
