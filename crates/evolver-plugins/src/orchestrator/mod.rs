//! First-success-wins evolution over ranked candidates.
//!
//! The [`Orchestrator`] selects and ranks the candidates for a request, then
//! runs one trial per candidate in rank order:
//!
//! ```text
//! SELECTING -> VERIFYING -> EXECUTING -> CHAINING -> EVALUATING -> SUCCEEDED
//!                  |            |           |            |
//!                  +------------+-----------+------------+--> next candidate
//! ```
//!
//! The first candidate that survives every stage is accepted and no further
//! candidates run. A rejected candidate is recorded as a [`CandidateFailure`]
//! and the next one is tried. When every candidate is rejected the run fails
//! with all failures together. Trials share no state besides the immutable
//! registry and policy; by default each trial also writes into its own
//! directory.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chain::{ChainContext, ChainWarning, run_chain};
use crate::error::{EvolutionError, ExecutionErrorKind};
use crate::integrity;
use crate::policy::Policy;
use crate::protocol::{Artifacts, Metrics, PluginRequest};
use crate::registry::{PluginEntry, PluginRegistry};
use crate::request::EvolutionRequest;
use crate::runner::{PluginExecutor, time_limit_for};
use crate::selection::select;
use crate::summary::RunSummary;
use crate::threshold::Violation;

/// Tracing target for orchestration.
const ORCHESTRATOR_TARGET: &str = "evolver_plugins::orchestrator";

/// Directory under the output root holding per-trial directories.
pub const TRIALS_DIR_NAME: &str = "trials";

/// Stage of a run or of one candidate's trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStage {
    /// Filtering and ranking the registry.
    Selecting,
    /// Checking the candidate's manifest signature.
    Verifying,
    /// Running the candidate.
    Executing,
    /// Running the post-processing chain.
    Chaining,
    /// Applying metric thresholds.
    Evaluating,
    /// A candidate was accepted.
    Succeeded,
    /// Every candidate was rejected.
    Exhausted,
    /// No candidate was eligible.
    NoCandidates,
}

impl TrialStage {
    /// Returns the stage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Selecting => "selecting",
            Self::Verifying => "verifying",
            Self::Executing => "executing",
            Self::Chaining => "chaining",
            Self::Evaluating => "evaluating",
            Self::Succeeded => "succeeded",
            Self::Exhausted => "exhausted",
            Self::NoCandidates => "no_candidates",
        }
    }
}

impl fmt::Display for TrialStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a candidate was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    /// The manifest signature is missing or does not match.
    #[serde(rename = "bad-signature")]
    BadSignature,
    /// The plugin could not be started.
    #[serde(rename = "spawn-failure")]
    SpawnFailure,
    /// The plugin outlived its time limit.
    #[serde(rename = "timeout")]
    Timeout,
    /// The plugin exited with a non-zero status.
    #[serde(rename = "nonzero-exit")]
    NonZeroExit,
    /// The plugin's output could not be interpreted.
    #[serde(rename = "malformed-reply")]
    MalformedReply,
    /// The plugin replied with an error status.
    #[serde(rename = "reported-error")]
    ReportedError,
    /// A required post-processing step failed.
    #[serde(rename = "chain-failed")]
    ChainFailed,
    /// A metric fell outside its bounds.
    #[serde(rename = "bad-metrics")]
    BadMetrics,
}

impl FailureKind {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadSignature => "bad-signature",
            Self::SpawnFailure => "spawn-failure",
            Self::Timeout => "timeout",
            Self::NonZeroExit => "nonzero-exit",
            Self::MalformedReply => "malformed-reply",
            Self::ReportedError => "reported-error",
            Self::ChainFailed => "chain-failed",
            Self::BadMetrics => "bad-metrics",
        }
    }
}

impl From<ExecutionErrorKind> for FailureKind {
    fn from(kind: ExecutionErrorKind) -> Self {
        match kind {
            ExecutionErrorKind::SpawnFailure => Self::SpawnFailure,
            ExecutionErrorKind::Timeout => Self::Timeout,
            ExecutionErrorKind::NonZeroExit => Self::NonZeroExit,
            ExecutionErrorKind::MalformedReply => Self::MalformedReply,
            ExecutionErrorKind::ReportedError => Self::ReportedError,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one rejected candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateFailure {
    /// Registry name of the candidate.
    pub plugin: String,
    /// Manifest version of the candidate.
    pub version: String,
    /// Rejection reason.
    #[serde(rename = "error")]
    pub kind: FailureKind,
    /// Stage the trial stopped in.
    pub stage: TrialStage,
    /// Human-readable detail.
    pub detail: String,
    /// Bounds the candidate's metrics violated.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
    /// The candidate's full metrics, kept for threshold rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
}

impl CandidateFailure {
    fn new(entry: &PluginEntry, kind: FailureKind, stage: TrialStage, detail: String) -> Self {
        Self {
            plugin: entry.name().to_owned(),
            version: entry.manifest().version().to_owned(),
            kind,
            stage,
            detail,
            violations: Vec::new(),
            metrics: None,
        }
    }
}

/// A non-fatal problem noticed during a candidate's trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialWarning {
    /// Candidate whose trial produced the warning.
    pub plugin: String,
    /// Warning text, e.g. `missing-post:<plugin>`.
    #[serde(rename = "warning")]
    pub message: String,
}

/// An accepted run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evolution {
    /// Registry name of the accepted candidate.
    pub chosen: String,
    /// Manifest version of the accepted candidate.
    pub version: String,
    /// Primary metrics merged with chain metrics.
    pub metrics: Metrics,
    /// Artifacts reported by the accepted primary.
    pub artifacts: Artifacts,
    /// Candidates tried, in rank order, ending with the accepted one.
    pub tried: Vec<String>,
    /// Rejections of earlier candidates.
    pub failures: Vec<CandidateFailure>,
    /// Warnings from every trial.
    pub warnings: Vec<TrialWarning>,
}

enum TrialOutcome {
    Accepted { metrics: Metrics, artifacts: Artifacts },
    Rejected(Box<CandidateFailure>),
}

impl TrialOutcome {
    fn rejected(entry: &PluginEntry, kind: FailureKind, stage: TrialStage, detail: String) -> Self {
        Self::Rejected(Box::new(CandidateFailure::new(entry, kind, stage, detail)))
    }
}

/// Drives trials over a registry under a policy.
///
/// # Example
///
/// ```rust,no_run
/// use std::path::Path;
///
/// use evolver_plugins::process::ProcessExecutor;
/// use evolver_plugins::{EvolutionRequest, Orchestrator, PluginRegistry, Policy};
///
/// let registry = PluginRegistry::discover([Path::new("plugins")]);
/// let policy = Policy::load(Path::new("policies/default.json")).unwrap();
/// let request = EvolutionRequest::new("nine");
/// let evolution = Orchestrator::new(&registry, &policy, ProcessExecutor::new())
///     .evolve(&request, Path::new("out"));
/// ```
#[derive(Debug)]
pub struct Orchestrator<'a, E> {
    registry: &'a PluginRegistry,
    policy: &'a Policy,
    executor: E,
    commit: String,
}

impl<'a, E: PluginExecutor> Orchestrator<'a, E> {
    /// Creates an orchestrator.
    #[must_use]
    pub const fn new(registry: &'a PluginRegistry, policy: &'a Policy, executor: E) -> Self {
        Self {
            registry,
            policy,
            executor,
            commit: String::new(),
        }
    }

    /// Records the revision the run belongs to in the run summary.
    #[must_use]
    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = commit.into();
        self
    }

    /// Runs trials until a candidate is accepted.
    ///
    /// On success the run summary and compact metrics are written into
    /// `output_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`EvolutionError::NoCandidates`] when no plugin is eligible,
    /// [`EvolutionError::Exhausted`] when every candidate was rejected, and
    /// [`EvolutionError::Output`] when an output directory or file cannot be
    /// written. An output failure carries the rejections and warnings
    /// gathered so far, plus the accepted run when only its summary failed.
    pub fn evolve(
        &self,
        request: &EvolutionRequest,
        output_dir: &Path,
    ) -> Result<Evolution, EvolutionError> {
        debug!(
            target: ORCHESTRATOR_TARGET,
            stage = %TrialStage::Selecting,
            api = %request.api,
            capabilities = ?request.capabilities,
            "selecting candidates"
        );
        let candidates = select(
            self.registry,
            &request.api,
            &request.capabilities,
            self.policy.selection.prefer,
        )
        .inspect_err(|err| {
            warn!(
                target: ORCHESTRATOR_TARGET,
                stage = %TrialStage::NoCandidates,
                error = %err,
                "no eligible candidates"
            );
        })?;

        let output_root =
            std::path::absolute(output_dir).map_err(|err| EvolutionError::output(output_dir, err))?;
        let mut tried = Vec::with_capacity(candidates.len());
        let mut failures = Vec::new();
        let mut warnings = Vec::new();

        for (index, entry) in candidates.into_iter().enumerate() {
            tried.push(entry.name().to_owned());
            let outcome = match self.trial(index, entry, request, &output_root, &mut warnings) {
                Ok(outcome) => outcome,
                Err(err) => return Err(err.with_trail(failures, warnings, None)),
            };
            match outcome {
                TrialOutcome::Accepted { metrics, artifacts } => {
                    info!(
                        target: ORCHESTRATOR_TARGET,
                        stage = %TrialStage::Succeeded,
                        plugin = entry.name(),
                        version = entry.manifest().version(),
                        rejected = failures.len(),
                        "candidate accepted"
                    );
                    let evolution = Evolution {
                        chosen: entry.name().to_owned(),
                        version: entry.manifest().version().to_owned(),
                        metrics,
                        artifacts,
                        tried,
                        failures,
                        warnings,
                    };
                    let summary = RunSummary::new(&evolution, &request.api, &self.commit);
                    if let Err(err) = summary.write(&output_root) {
                        return Err(err.with_trail(
                            evolution.failures.clone(),
                            evolution.warnings.clone(),
                            Some(evolution),
                        ));
                    }
                    return Ok(evolution);
                }
                TrialOutcome::Rejected(failure) => {
                    warn!(
                        target: ORCHESTRATOR_TARGET,
                        stage = %failure.stage,
                        plugin = %failure.plugin,
                        kind = %failure.kind,
                        detail = %failure.detail,
                        "candidate rejected"
                    );
                    failures.push(*failure);
                }
            }
        }

        warn!(
            target: ORCHESTRATOR_TARGET,
            stage = %TrialStage::Exhausted,
            rejected = failures.len(),
            "every candidate was rejected"
        );
        Err(EvolutionError::Exhausted { failures, warnings })
    }

    fn trial(
        &self,
        index: usize,
        entry: &PluginEntry,
        request: &EvolutionRequest,
        output_root: &Path,
        warnings: &mut Vec<TrialWarning>,
    ) -> Result<TrialOutcome, EvolutionError> {
        let manifest = entry.manifest();
        let require_signatures = self.policy.security.require_signatures;

        debug!(
            target: ORCHESTRATOR_TARGET,
            stage = %TrialStage::Verifying,
            plugin = entry.name(),
            required = require_signatures,
            "verifying manifest"
        );
        if require_signatures && !integrity::verify(manifest) {
            return Ok(TrialOutcome::rejected(
                entry,
                FailureKind::BadSignature,
                TrialStage::Verifying,
                String::from("manifest signature is missing or does not match"),
            ));
        }

        let trial_dir = self.trial_dir(index, entry, output_root)?;
        let limit = time_limit_for(manifest, self.policy.limits.time_limit());
        let plugin_request = PluginRequest::new(request.params.clone(), &trial_dir, manifest);
        debug!(
            target: ORCHESTRATOR_TARGET,
            stage = %TrialStage::Executing,
            plugin = entry.name(),
            output_dir = %trial_dir.display(),
            "executing candidate"
        );
        let result = match self.executor.execute(entry, &plugin_request, limit) {
            Ok(executed) => executed,
            Err(err) => {
                return Ok(TrialOutcome::rejected(
                    entry,
                    err.kind().into(),
                    TrialStage::Executing,
                    err.to_string(),
                ));
            }
        };
        let (mut metrics, artifacts) = result.into_parts();

        debug!(
            target: ORCHESTRATOR_TARGET,
            stage = %TrialStage::Chaining,
            plugin = entry.name(),
            steps = self.policy.post_chain.len(),
            "running post-processing chain"
        );
        let context = ChainContext {
            registry: self.registry,
            artifacts: &artifacts,
            output_dir: &trial_dir,
            time_limit: limit,
            require_signatures,
        };
        match run_chain(&self.executor, &self.policy.post_chain, &context) {
            Ok(outcome) => {
                record_warnings(warnings, entry, &outcome.warnings);
                metrics.extend(outcome.metrics);
            }
            Err(failure) => {
                record_warnings(warnings, entry, &failure.warnings);
                return Ok(TrialOutcome::rejected(
                    entry,
                    FailureKind::ChainFailed,
                    TrialStage::Chaining,
                    failure.to_string(),
                ));
            }
        }

        debug!(
            target: ORCHESTRATOR_TARGET,
            stage = %TrialStage::Evaluating,
            plugin = entry.name(),
            "applying thresholds"
        );
        let violations = self.policy.thresholds.violations(&metrics);
        if !violations.is_empty() {
            let detail = violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            let mut failure = CandidateFailure::new(
                entry,
                FailureKind::BadMetrics,
                TrialStage::Evaluating,
                detail,
            );
            failure.violations = violations;
            failure.metrics = Some(metrics);
            return Ok(TrialOutcome::Rejected(Box::new(failure)));
        }

        Ok(TrialOutcome::Accepted { metrics, artifacts })
    }

    /// Creates the directory a trial writes into.
    fn trial_dir(
        &self,
        index: usize,
        entry: &PluginEntry,
        output_root: &Path,
    ) -> Result<PathBuf, EvolutionError> {
        let dir = if self.policy.output.isolate_trials {
            output_root
                .join(TRIALS_DIR_NAME)
                .join(format!("{index}-{}", entry.name()))
        } else {
            output_root.to_path_buf()
        };
        std::fs::create_dir_all(&dir).map_err(|err| EvolutionError::output(&dir, err))?;
        Ok(dir)
    }
}

fn record_warnings(sink: &mut Vec<TrialWarning>, entry: &PluginEntry, found: &[ChainWarning]) {
    sink.extend(found.iter().map(|warning| TrialWarning {
        plugin: entry.name().to_owned(),
        message: warning.to_string(),
    }));
}
