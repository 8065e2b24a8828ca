//! Behaviour-driven tests for plugin evolution.

use std::cell::RefCell;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::json;
use tempfile::TempDir;

use super::ReplayExecutor;
use crate::chain::ChainStep;
use crate::error::EvolutionError;
use crate::integrity;
use crate::manifest::PluginManifest;
use crate::orchestrator::{CandidateFailure, Evolution, Orchestrator, TrialWarning};
use crate::policy::Policy;
use crate::registry::{PluginEntry, PluginRegistry};
use crate::request::EvolutionRequest;
use crate::selection::SelectionRule;
use crate::summary::SUMMARY_FILE_NAME;

// ---------------------------------------------------------------------------
// Test world
// ---------------------------------------------------------------------------

struct TestWorld {
    registry: PluginRegistry,
    policy: Policy,
    executor: ReplayExecutor,
    output: TempDir,
    outcome: Option<Result<Evolution, EvolutionError>>,
}

impl TestWorld {
    fn new() -> Self {
        Self {
            registry: PluginRegistry::new(),
            policy: Policy::default(),
            executor: ReplayExecutor::default(),
            output: TempDir::new().expect("temp dir"),
            outcome: None,
        }
    }

    fn outcome(&self) -> &Result<Evolution, EvolutionError> {
        self.outcome.as_ref().expect("evolution has not run")
    }

    fn failures(&self) -> &[CandidateFailure] {
        match self.outcome() {
            Ok(evolution) => &evolution.failures,
            Err(EvolutionError::Exhausted { failures, .. }) => failures,
            Err(other) => panic!("run failed without candidate records: {other}"),
        }
    }

    fn warnings(&self) -> &[TrialWarning] {
        match self.outcome() {
            Ok(evolution) => &evolution.warnings,
            Err(EvolutionError::Exhausted { warnings, .. }) => warnings,
            Err(other) => panic!("run failed without warnings: {other}"),
        }
    }

    fn evolution(&self) -> &Evolution {
        self.outcome()
            .as_ref()
            .expect("expected an accepted candidate")
    }
}

#[fixture]
fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}

fn unquote(text: &str) -> &str {
    text.trim_matches('"')
}

// ---------------------------------------------------------------------------
// Given steps
// ---------------------------------------------------------------------------

#[given("a registry with plugin {name} at version {version} serving {api}")]
fn given_plugin(world: &RefCell<TestWorld>, name: String, version: String, api: String) {
    let plugin = unquote(&name);
    let manifest = PluginManifest::new(plugin, unquote(&version))
        .with_apis([unquote(&api)])
        .with_capabilities(["audio", "sequence"]);
    world.borrow_mut().registry.register(PluginEntry::new(
        plugin,
        integrity::sign(&manifest),
        format!("/plugins/{plugin}").into(),
    ));
}

#[given("plugin {name} has a corrupted signature")]
fn given_corrupted(world: &RefCell<TestWorld>, name: String) {
    let plugin = unquote(&name);
    let mut w = world.borrow_mut();
    let entry = w.registry.get(plugin).expect("plugin registered").clone();
    let corrupted = entry.manifest().clone().with_signature("0".repeat(64));
    w.registry.register(PluginEntry::new(
        plugin,
        corrupted,
        entry.location().to_path_buf(),
    ));
}

#[given("plugin {name} replies with {metric} = {value}")]
fn given_reply(world: &RefCell<TestWorld>, name: String, metric: String, value: f64) {
    world
        .borrow_mut()
        .executor
        .set_metric(unquote(&name), unquote(&metric), json!(value));
}

#[given("plugin {name} times out")]
fn given_timeout(world: &RefCell<TestWorld>, name: String) {
    world.borrow_mut().executor.set_timeout(unquote(&name));
}

#[given("the policy prefers the highest version")]
fn given_highest_version(world: &RefCell<TestWorld>) {
    world.borrow_mut().policy.selection.prefer = SelectionRule::HighestVersion;
}

#[given("the policy requires signatures")]
fn given_signatures(world: &RefCell<TestWorld>) {
    world.borrow_mut().policy.security.require_signatures = true;
}

#[given("the policy requires metric {metric} of at least {bound}")]
fn given_min_bound(world: &RefCell<TestWorld>, metric: String, bound: f64) {
    let mut w = world.borrow_mut();
    let thresholds = std::mem::take(&mut w.policy.thresholds);
    w.policy.thresholds = thresholds.with_min(unquote(&metric), bound);
}

#[given("the policy chains post-processor {name}")]
fn given_chain(world: &RefCell<TestWorld>, name: String) {
    world
        .borrow_mut()
        .policy
        .post_chain
        .push(ChainStep::new(unquote(&name)));
}

// ---------------------------------------------------------------------------
// When steps
// ---------------------------------------------------------------------------

#[when("evolution is requested for {api}")]
fn when_evolve(world: &RefCell<TestWorld>, api: String) {
    let request = EvolutionRequest::new(unquote(&api)).with_capabilities(["audio"]);
    let outcome = {
        let w = world.borrow();
        Orchestrator::new(&w.registry, &w.policy, &w.executor).evolve(&request, w.output.path())
    };
    world.borrow_mut().outcome = Some(outcome);
}

// ---------------------------------------------------------------------------
// Then steps
// ---------------------------------------------------------------------------

#[then("the chosen plugin is {name}")]
fn then_chosen(world: &RefCell<TestWorld>, name: String) {
    assert_eq!(world.borrow().evolution().chosen, unquote(&name));
}

#[then("candidate {name} was rejected with {kind}")]
fn then_rejected(world: &RefCell<TestWorld>, name: String, kind: String) {
    let w = world.borrow();
    let plugin = unquote(&name);
    let failure = w
        .failures()
        .iter()
        .find(|failure| failure.plugin == plugin)
        .unwrap_or_else(|| panic!("no failure recorded for '{plugin}'"));
    assert_eq!(failure.kind.as_str(), unquote(&kind));
}

#[then("the run fails with no candidates")]
fn then_no_candidates(world: &RefCell<TestWorld>) {
    let w = world.borrow();
    assert!(
        matches!(w.outcome(), Err(EvolutionError::NoCandidates(_))),
        "expected no candidates, got {:?}",
        w.outcome()
    );
}

#[then("the run is exhausted with {count} failures")]
fn then_exhausted(world: &RefCell<TestWorld>, count: usize) {
    let w = world.borrow();
    assert!(matches!(w.outcome(), Err(EvolutionError::Exhausted { .. })));
    assert_eq!(w.failures().len(), count);
}

#[then("no plugin was executed")]
fn then_nothing_executed(world: &RefCell<TestWorld>) {
    assert!(world.borrow().executor.executed.borrow().is_empty());
}

#[then("the warnings include {warning}")]
fn then_warning(world: &RefCell<TestWorld>, warning: String) {
    let w = world.borrow();
    let expected = unquote(&warning);
    assert!(
        w.warnings().iter().any(|found| found.message == expected),
        "expected warning '{expected}' in {:?}",
        w.warnings()
    );
}

#[then("the metric {metric} equals {value}")]
fn then_metric(world: &RefCell<TestWorld>, metric: String, value: f64) {
    let w = world.borrow();
    let name = unquote(&metric);
    let found = w
        .evolution()
        .metrics
        .get(name)
        .and_then(serde_json::Value::as_f64)
        .unwrap_or_else(|| panic!("metric '{name}' missing"));
    assert!((found - value).abs() < f64::EPSILON, "{name}={found}, expected {value}");
}

#[then("a run summary was written")]
fn then_summary(world: &RefCell<TestWorld>) {
    assert!(world.borrow().output.path().join(SUMMARY_FILE_NAME).is_file());
}

#[then("no run summary was written")]
fn then_no_summary(world: &RefCell<TestWorld>) {
    assert!(!world.borrow().output.path().join(SUMMARY_FILE_NAME).exists());
}

// ---------------------------------------------------------------------------
// Scenario registration
// ---------------------------------------------------------------------------

#[scenario(
    path = "tests/features/evolution.feature",
    name = "Tampered newest version falls back to a trusted older one"
)]
fn signature_fallback(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/evolution.feature",
    name = "Unknown request kind runs nothing"
)]
fn unknown_request_kind(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/evolution.feature",
    name = "Missing post-processor is only a warning"
)]
fn missing_post_processor(world: RefCell<TestWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/evolution.feature",
    name = "Every candidate is rejected"
)]
fn every_candidate_rejected(world: RefCell<TestWorld>) {
    drop(world);
}
