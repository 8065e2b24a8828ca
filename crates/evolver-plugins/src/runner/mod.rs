//! Execution seam between orchestration logic and plugin transport.
//!
//! The orchestrator and the post-processing chain never spawn processes
//! themselves. They hand a resolved [`PluginEntry`] and a [`PluginRequest`]
//! to a [`PluginExecutor`] and receive an [`ExecutionResult`]. The production
//! implementation is [`ProcessExecutor`](crate::process::ProcessExecutor);
//! tests substitute in-process doubles.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ExecutionError;
use crate::manifest::PluginManifest;
use crate::protocol::{Artifacts, Metrics, PluginReply, PluginRequest};
use crate::registry::PluginEntry;

/// Metric name under which the wall-clock execution time is recorded.
pub const LATENCY_METRIC: &str = "latency_ms";

/// Trait abstracting plugin execution for testability.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use evolver_plugins::runner::PluginExecutor;
/// use evolver_plugins::{
///     ExecutionError, ExecutionResult, PluginEntry, PluginReply, PluginRequest,
/// };
///
/// struct EchoExecutor;
///
/// impl PluginExecutor for EchoExecutor {
///     fn execute(
///         &self,
///         entry: &PluginEntry,
///         _request: &PluginRequest,
///         _time_limit: Duration,
///     ) -> Result<ExecutionResult, ExecutionError> {
///         Ok(ExecutionResult::new(
///             entry.name(),
///             PluginReply::parse("{}", ""),
///             Duration::from_millis(5),
///         ))
///     }
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait PluginExecutor {
    /// Runs the plugin described by `entry` with the given request.
    ///
    /// # Errors
    ///
    /// Returns an [`ExecutionError`] if the plugin cannot be spawned, exceeds
    /// `time_limit`, exits with a non-zero status, replies with an error
    /// status, or produces output that cannot be interpreted.
    fn execute(
        &self,
        entry: &PluginEntry,
        request: &PluginRequest,
        time_limit: Duration,
    ) -> Result<ExecutionResult, ExecutionError>;
}

impl<E: PluginExecutor + ?Sized> PluginExecutor for &E {
    fn execute(
        &self,
        entry: &PluginEntry,
        request: &PluginRequest,
        time_limit: Duration,
    ) -> Result<ExecutionResult, ExecutionError> {
        (**self).execute(entry, request, time_limit)
    }
}

/// Outcome of one successful plugin invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    plugin: String,
    reply: PluginReply,
    metrics: Metrics,
    artifacts: Artifacts,
    elapsed: Duration,
}

impl ExecutionResult {
    /// Builds a result from a reply, recording `elapsed` as the
    /// [`LATENCY_METRIC`].
    #[must_use]
    pub fn new(plugin: impl Into<String>, reply: PluginReply, elapsed: Duration) -> Self {
        let mut metrics = reply.metrics();
        metrics.insert(
            String::from(LATENCY_METRIC),
            serde_json::Value::from(latency_millis(elapsed)),
        );
        let artifacts = reply.artifacts();
        Self {
            plugin: plugin.into(),
            reply,
            metrics,
            artifacts,
            elapsed,
        }
    }

    /// Returns the name of the plugin that produced the result.
    #[must_use]
    pub const fn plugin(&self) -> &str {
        self.plugin.as_str()
    }

    /// Returns the reply as interpreted from the plugin's output.
    #[must_use]
    pub const fn reply(&self) -> &PluginReply {
        &self.reply
    }

    /// Returns the metrics, including [`LATENCY_METRIC`].
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Returns the artifacts reported by the plugin.
    #[must_use]
    pub const fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    /// Looks up a reported artifact path by name.
    #[must_use]
    pub fn artifact(&self, name: &str) -> Option<&PathBuf> {
        self.artifacts.get(name)
    }

    /// Returns the wall-clock execution time.
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Consumes the result, returning its metrics and artifacts.
    #[must_use]
    pub fn into_parts(self) -> (Metrics, Artifacts) {
        (self.metrics, self.artifacts)
    }
}

/// Resolves the wall-clock budget for a plugin.
///
/// The manifest's `time_limit_s` override wins when it is a valid duration;
/// a missing, negative, or non-finite override falls back to `fallback`.
#[must_use]
pub fn time_limit_for(manifest: &PluginManifest, fallback: Duration) -> Duration {
    manifest
        .time_limit_secs()
        .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
        .unwrap_or(fallback)
}

#[expect(
    clippy::float_arithmetic,
    reason = "latency is reported in fractional milliseconds"
)]
fn latency_millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}
