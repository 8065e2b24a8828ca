//! Plugin discovery, verification, execution, and evolution for Evolver.
//!
//! The `evolver-plugins` crate decides which generator plugin serves a
//! request. Plugins are directories holding a `manifest.json` and an entry
//! point; they run as short-lived child processes that read one JSON request
//! line on stdin and answer on stdout.
//!
//! # Architecture
//!
//! An evolution run flows through the modules in order:
//!
//! 1. [`registry`] discovers plugin directories under one or more roots.
//! 2. [`selection`] filters the registry by API and capabilities and ranks
//!    what is left according to the [`Policy`].
//! 3. For each candidate the [`Orchestrator`] checks the manifest
//!    [`integrity`] signature, runs the plugin through a [`PluginExecutor`]
//!    (normally [`process::ProcessExecutor`]), feeds its artifacts through the
//!    post-processing [`chain`], and checks the merged metrics against the
//!    policy [`threshold`]s.
//! 4. The first candidate that survives every stage is chosen and its
//!    [`summary`] is written to the output directory. Every rejection is
//!    recorded as a [`CandidateFailure`].
//!
//! # Example
//!
//! ```rust,no_run
//! use evolver_plugins::{EvolutionRequest, Orchestrator, Policy, PluginRegistry};
//! use evolver_plugins::process::ProcessExecutor;
//! use std::path::Path;
//!
//! let registry = PluginRegistry::discover(["plugins"]);
//! let policy = Policy::load(Path::new("policies/default.json")).expect("policy");
//! let request = EvolutionRequest::new("nine").with_capabilities(["audio"]);
//!
//! let executor = ProcessExecutor::new();
//! let evolution = Orchestrator::new(&registry, &policy, &executor)
//!     .evolve(&request, Path::new("out"))
//!     .expect("a plugin was accepted");
//! println!("chose {} {}", evolution.chosen, evolution.version);
//! ```

pub mod chain;
pub mod document;
pub mod error;
pub mod integrity;
pub mod manifest;
pub mod orchestrator;
pub mod policy;
pub mod process;
pub mod protocol;
pub mod registry;
pub mod request;
pub mod runner;
pub mod selection;
pub mod summary;
pub mod threshold;

#[cfg(test)]
mod tests;

pub use self::chain::{ChainStep, ChainWarning};
pub use self::error::{
    ChainFailure, DocumentError, EvolutionError, ExecutionError, ExecutionErrorKind,
    NoCandidatesError,
};
pub use self::manifest::PluginManifest;
pub use self::orchestrator::{
    CandidateFailure, Evolution, FailureKind, Orchestrator, TrialStage, TrialWarning,
};
pub use self::policy::Policy;
pub use self::protocol::{
    Artifacts, Metrics, PluginReply, PluginRequest, RawReply, StructuredReply,
};
pub use self::registry::{PluginEntry, PluginRegistry, RegistryWarning};
pub use self::request::EvolutionRequest;
pub use self::runner::{ExecutionResult, PluginExecutor};
pub use self::summary::RunSummary;
pub use self::threshold::{Thresholds, Violation};
