//! Unit tests for the post-processing chain.

use std::path::{Path, PathBuf};

use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::error::ExecutionError;
use crate::manifest::PluginManifest;
use crate::protocol::{PluginReply, StructuredReply};
use crate::registry::PluginEntry;
use crate::runner::{ExecutionResult, MockPluginExecutor};

const OUT: &str = "/runs/out/trials/0-nine";

fn reply_with(metrics: Value) -> PluginReply {
    let parsed: Metrics = serde_json::from_value(metrics).expect("metrics object");
    PluginReply::Structured(StructuredReply::ok(parsed, Artifacts::new()))
}

fn success(name: &str, metrics: Value) -> Result<ExecutionResult, ExecutionError> {
    Ok(ExecutionResult::new(
        name,
        reply_with(metrics),
        Duration::from_millis(7),
    ))
}

fn add(registry: &mut PluginRegistry, manifest: PluginManifest) {
    let name = manifest.name().to_owned();
    registry.register(PluginEntry::new(
        name.clone(),
        manifest,
        PathBuf::from(format!("/plugins/{name}")),
    ));
}

#[fixture]
fn registry() -> PluginRegistry {
    let mut r = PluginRegistry::new();
    add(
        &mut r,
        integrity::sign(&PluginManifest::new("order_meter", "1.0.0").with_apis(["analysis"])),
    );
    add(
        &mut r,
        PluginManifest::new("spectrum", "0.2.0")
            .with_apis(["analysis"])
            .with_time_limit_secs(3.0),
    );
    r
}

fn context<'a>(registry: &'a PluginRegistry, artifacts: &'a Artifacts) -> ChainContext<'a> {
    ChainContext {
        registry,
        artifacts,
        output_dir: Path::new(OUT),
        time_limit: Duration::from_secs(15),
        require_signatures: false,
    }
}

// ---------------------------------------------------------------------------
// Steps and warnings
// ---------------------------------------------------------------------------

#[rstest]
fn missing_plugin_is_a_warning(registry: PluginRegistry) {
    let mut executor = MockPluginExecutor::new();
    executor.expect_execute().never();
    let artifacts = Artifacts::new();

    let outcome = run_chain(
        &executor,
        &[ChainStep::new("ghost")],
        &context(&registry, &artifacts),
    )
    .expect("optional step");

    assert!(outcome.metrics.is_empty());
    assert_eq!(
        outcome.warnings,
        vec![ChainWarning::MissingPlugin {
            plugin: String::from("ghost")
        }]
    );
    assert_eq!(outcome.warnings[0].to_string(), "missing-post:ghost");
}

#[rstest]
fn metrics_merge_last_write_wins_without_latency(registry: PluginRegistry) {
    let mut executor = MockPluginExecutor::new();
    executor
        .expect_execute()
        .withf(|entry, _, _| entry.name() == "order_meter")
        .returning(|entry, _, _| success(entry.name(), json!({"order_k2": 0.4, "shared": 1})));
    executor
        .expect_execute()
        .withf(|entry, _, _| entry.name() == "spectrum")
        .returning(|entry, _, _| success(entry.name(), json!({"centroid": 440, "shared": 2})));
    let artifacts = Artifacts::new();

    let outcome = run_chain(
        &executor,
        &[ChainStep::new("order_meter"), ChainStep::new("spectrum")],
        &context(&registry, &artifacts),
    )
    .expect("chain runs");

    assert!(outcome.warnings.is_empty());
    assert_eq!(outcome.metrics.get("order_k2"), Some(&json!(0.4)));
    assert_eq!(outcome.metrics.get("centroid"), Some(&json!(440)));
    assert_eq!(outcome.metrics.get("shared"), Some(&json!(2)));
    assert!(!outcome.metrics.contains_key(LATENCY_METRIC));
}

#[rstest]
fn failing_optional_step_is_a_warning(registry: PluginRegistry) {
    let mut executor = MockPluginExecutor::new();
    executor.expect_execute().returning(|entry, _, limit| {
        Err(ExecutionError::Timeout {
            name: entry.name().to_owned(),
            limit,
        })
    });
    let artifacts = Artifacts::new();

    let outcome = run_chain(
        &executor,
        &[ChainStep::new("order_meter")],
        &context(&registry, &artifacts),
    )
    .expect("optional step");

    assert_eq!(outcome.warnings.len(), 1);
    let message = outcome.warnings[0].to_string();
    assert!(
        message.starts_with("post-error:order_meter:"),
        "unexpected warning: {message}"
    );
}

#[rstest]
fn failing_required_step_fails_with_prior_warnings(registry: PluginRegistry) {
    let mut executor = MockPluginExecutor::new();
    executor.expect_execute().returning(|entry, _, _| {
        Err(ExecutionError::NonZeroExit {
            name: entry.name().to_owned(),
            status: 2,
            stderr: String::new(),
        })
    });
    let artifacts = Artifacts::new();
    let steps = [
        ChainStep::new("ghost"),
        ChainStep::new("order_meter").required(),
        ChainStep::new("spectrum"),
    ];

    let failure =
        run_chain(&executor, &steps, &context(&registry, &artifacts)).expect_err("required step");

    assert_eq!(failure.plugin, "order_meter");
    assert_eq!(failure.warnings.len(), 1);
    assert_eq!(failure.warnings[0].plugin(), "ghost");
}

#[rstest]
fn missing_required_plugin_fails(registry: PluginRegistry) {
    let executor = MockPluginExecutor::new();
    let artifacts = Artifacts::new();
    let failure = run_chain(
        &executor,
        &[ChainStep::new("ghost").required()],
        &context(&registry, &artifacts),
    )
    .expect_err("required step");
    assert_eq!(failure.plugin, "ghost");
    assert_eq!(failure.detail, "missing-post:ghost");
}

// ---------------------------------------------------------------------------
// Trust
// ---------------------------------------------------------------------------

#[rstest]
#[case::required(true, 1)]
#[case::not_required(false, 0)]
fn unsigned_chain_plugin_respects_policy(
    registry: PluginRegistry,
    #[case] require_signatures: bool,
    #[case] expected_warnings: usize,
) {
    let mut executor = MockPluginExecutor::new();
    executor
        .expect_execute()
        .returning(|entry, _, _| success(entry.name(), json!({"centroid": 1})));
    let artifacts = Artifacts::new();
    let ctx = ChainContext {
        require_signatures,
        ..context(&registry, &artifacts)
    };

    let outcome = run_chain(
        &executor,
        &[ChainStep::new("order_meter"), ChainStep::new("spectrum")],
        &ctx,
    )
    .expect("optional steps");

    assert_eq!(outcome.warnings.len(), expected_warnings);
    if require_signatures {
        assert_eq!(outcome.warnings[0].to_string(), "bad-signature-post:spectrum");
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[rstest]
fn reported_artifact_is_passed_with_step_params(registry: PluginRegistry) {
    let mut executor = MockPluginExecutor::new();
    executor
        .expect_execute()
        .withf(|_, request, limit| {
            request.params().get("wav") == Some(&json!("/elsewhere/take1.wav"))
                && request.params().get("k_values") == Some(&json!([2, 3]))
                && request.output_dir() == Path::new(OUT)
                && *limit == Duration::from_secs(15)
        })
        .times(1)
        .returning(|entry, _, _| success(entry.name(), json!({})));
    let mut artifacts = Artifacts::new();
    artifacts.insert(
        String::from("sequence.wav"),
        PathBuf::from("/elsewhere/take1.wav"),
    );

    let step = ChainStep::new("order_meter").with_param("k_values", json!([2, 3]));
    run_chain(&executor, &[step], &context(&registry, &artifacts)).expect("chain runs");
}

#[rstest]
fn unreported_artifact_falls_back_to_output_dir(registry: PluginRegistry) {
    let mut executor = MockPluginExecutor::new();
    executor
        .expect_execute()
        .withf(|_, request, _| {
            request.params().get("audio")
                == Some(&json!(format!("{OUT}/mix.wav")))
        })
        .times(1)
        .returning(|entry, _, _| success(entry.name(), json!({})));
    let artifacts = Artifacts::new();

    let step = ChainStep::new("order_meter").with_input("audio", "mix.wav");
    run_chain(&executor, &[step], &context(&registry, &artifacts)).expect("chain runs");
}

#[rstest]
fn dependent_time_limit_override_wins(registry: PluginRegistry) {
    let mut executor = MockPluginExecutor::new();
    executor
        .expect_execute()
        .withf(|_, _, limit| *limit == Duration::from_secs(3))
        .times(1)
        .returning(|entry, _, _| success(entry.name(), json!({})));
    let artifacts = Artifacts::new();

    run_chain(
        &executor,
        &[ChainStep::new("spectrum")],
        &context(&registry, &artifacts),
    )
    .expect("chain runs");
}

#[test]
fn step_deserialises_with_defaults() {
    let step: ChainStep =
        serde_json::from_value(json!({"plugin": "codex.analysis.order_meter"})).expect("step");
    assert_eq!(step, ChainStep::new("codex.analysis.order_meter"));
    assert_eq!(step.input.param, DEFAULT_INPUT_PARAM);
    assert_eq!(step.input.artifact, DEFAULT_INPUT_ARTIFACT);
    assert!(!step.required);
}
