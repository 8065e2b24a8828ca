//! Post-processing chain run after a primary plugin succeeds.
//!
//! Each [`ChainStep`] names a dependent plugin from the registry. The step
//! receives its configured parameters plus a path to one of the primary's
//! artifacts, runs through the same [`PluginExecutor`], and contributes its
//! metrics to the candidate. Later steps overwrite earlier metrics of the
//! same name; a step's own `latency_ms` is not merged.
//!
//! Chain problems are warnings: a missing plugin, an untrusted manifest, or a
//! failed execution skips the step and the candidate still stands. A step
//! marked `required` turns its problem into a [`ChainFailure`] instead.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ChainFailure;
use crate::integrity;
use crate::protocol::{Artifacts, Metrics, PluginRequest};
use crate::registry::PluginRegistry;
use crate::runner::{LATENCY_METRIC, PluginExecutor, time_limit_for};

/// Tracing target for chain operations.
const CHAIN_TARGET: &str = "evolver_plugins::chain";

/// Parameter that carries the primary artifact when a step does not say.
pub const DEFAULT_INPUT_PARAM: &str = "wav";

/// Artifact handed to chain steps when a step does not say.
pub const DEFAULT_INPUT_ARTIFACT: &str = "sequence.wav";

/// Which primary artifact a step consumes and under which parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInput {
    /// Parameter name the resolved path is passed under.
    pub param: String,
    /// Artifact name as reported by the primary, or a file name inside the
    /// trial's output directory.
    pub artifact: String,
}

impl Default for ArtifactInput {
    fn default() -> Self {
        Self {
            param: String::from(DEFAULT_INPUT_PARAM),
            artifact: String::from(DEFAULT_INPUT_ARTIFACT),
        }
    }
}

impl ArtifactInput {
    /// Resolves the artifact to a path.
    ///
    /// A path the primary reported under this name wins; otherwise the name
    /// is taken as a file inside `output_dir`.
    #[must_use]
    pub fn resolve(&self, artifacts: &Artifacts, output_dir: &Path) -> PathBuf {
        artifacts
            .get(&self.artifact)
            .cloned()
            .unwrap_or_else(|| output_dir.join(&self.artifact))
    }
}

/// One configured post-processing step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStep {
    /// Registry name of the dependent plugin.
    pub plugin: String,
    /// Step-specific parameters forwarded to the plugin.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Primary artifact passed to the plugin.
    #[serde(default)]
    pub input: ArtifactInput,
    /// Whether a problem with this step fails the candidate.
    #[serde(default)]
    pub required: bool,
}

impl ChainStep {
    /// Creates an optional step with no extra parameters.
    #[must_use]
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            params: Map::new(),
            input: ArtifactInput::default(),
            required: false,
        }
    }

    /// Adds a forwarded parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Selects which primary artifact the step consumes.
    #[must_use]
    pub fn with_input(mut self, param: impl Into<String>, artifact: impl Into<String>) -> Self {
        self.input = ArtifactInput {
            param: param.into(),
            artifact: artifact.into(),
        };
        self
    }

    /// Marks the step as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn request_params(&self, artifacts: &Artifacts, output_dir: &Path) -> Map<String, Value> {
        let mut params = self.params.clone();
        let input = self.input.resolve(artifacts, output_dir);
        params.insert(
            self.input.param.clone(),
            Value::String(input.to_string_lossy().into_owned()),
        );
        params
    }
}

/// A non-fatal problem with one chain step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainWarning {
    /// The step's plugin is not in the registry.
    MissingPlugin {
        /// Dependent plugin name.
        plugin: String,
    },
    /// The step's plugin failed integrity verification.
    BadSignature {
        /// Dependent plugin name.
        plugin: String,
    },
    /// The step's plugin ran and failed.
    StepFailed {
        /// Dependent plugin name.
        plugin: String,
        /// Failure description.
        detail: String,
    },
}

impl ChainWarning {
    /// Returns the dependent plugin the warning is about.
    #[must_use]
    pub fn plugin(&self) -> &str {
        match self {
            Self::MissingPlugin { plugin }
            | Self::BadSignature { plugin }
            | Self::StepFailed { plugin, .. } => plugin,
        }
    }
}

impl fmt::Display for ChainWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPlugin { plugin } => write!(f, "missing-post:{plugin}"),
            Self::BadSignature { plugin } => write!(f, "bad-signature-post:{plugin}"),
            Self::StepFailed { plugin, detail } => write!(f, "post-error:{plugin}:{detail}"),
        }
    }
}

/// Shared inputs for every step of one candidate's chain.
#[derive(Debug, Clone, Copy)]
pub struct ChainContext<'a> {
    /// Registry the dependent plugins are looked up in.
    pub registry: &'a PluginRegistry,
    /// The primary's reported artifacts.
    pub artifacts: &'a Artifacts,
    /// Output directory of the current trial.
    pub output_dir: &'a Path,
    /// Time limit used when a dependent plugin declares none of its own.
    pub time_limit: Duration,
    /// Whether dependent manifests must verify.
    pub require_signatures: bool,
}

/// Metrics and warnings gathered from a completed chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainOutcome {
    /// Metrics contributed by chain steps, last write wins.
    pub metrics: Metrics,
    /// Problems with optional steps.
    pub warnings: Vec<ChainWarning>,
}

/// Runs every step in order.
///
/// # Errors
///
/// Returns a [`ChainFailure`] when a step marked `required` cannot be run or
/// fails; warnings gathered before it are carried in the failure.
pub fn run_chain<E: PluginExecutor>(
    executor: &E,
    steps: &[ChainStep],
    context: &ChainContext<'_>,
) -> Result<ChainOutcome, ChainFailure> {
    let mut outcome = ChainOutcome::default();
    for step in steps {
        match run_step(executor, step, context) {
            Ok(metrics) => outcome.metrics.extend(metrics),
            Err(problem) if step.required => {
                warn!(
                    target: CHAIN_TARGET,
                    plugin = %step.plugin,
                    problem = %problem,
                    "required chain step failed"
                );
                return Err(ChainFailure {
                    plugin: step.plugin.clone(),
                    detail: problem.to_string(),
                    warnings: outcome.warnings,
                });
            }
            Err(problem) => {
                warn!(
                    target: CHAIN_TARGET,
                    plugin = %step.plugin,
                    problem = %problem,
                    "skipping chain step"
                );
                outcome.warnings.push(problem);
            }
        }
    }
    Ok(outcome)
}

fn run_step<E: PluginExecutor>(
    executor: &E,
    step: &ChainStep,
    context: &ChainContext<'_>,
) -> Result<Metrics, ChainWarning> {
    let entry = context
        .registry
        .get(&step.plugin)
        .ok_or_else(|| ChainWarning::MissingPlugin {
            plugin: step.plugin.clone(),
        })?;

    if context.require_signatures && !integrity::verify(entry.manifest()) {
        return Err(ChainWarning::BadSignature {
            plugin: step.plugin.clone(),
        });
    }

    let request = PluginRequest::new(
        step.request_params(context.artifacts, context.output_dir),
        context.output_dir,
        entry.manifest(),
    );
    let limit = time_limit_for(entry.manifest(), context.time_limit);
    debug!(
        target: CHAIN_TARGET,
        plugin = %step.plugin,
        limit_s = limit.as_secs_f64(),
        "running chain step"
    );

    executor
        .execute(entry, &request, limit)
        .map(|result| {
            // The primary's latency is the candidate's latency.
            let (mut metrics, _) = result.into_parts();
            metrics.remove(LATENCY_METRIC);
            metrics
        })
        .map_err(|err| ChainWarning::StepFailed {
            plugin: step.plugin.clone(),
            detail: err.to_string(),
        })
}

#[cfg(test)]
mod tests;
