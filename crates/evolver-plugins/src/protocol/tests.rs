//! Unit tests for the IPC protocol types.

use std::path::Path;

use rstest::rstest;
use serde_json::json;

use super::*;

// ---------------------------------------------------------------------------
// PluginRequest
// ---------------------------------------------------------------------------

#[test]
fn request_serialises_params_output_dir_and_manifest() {
    let manifest = PluginManifest::new("nine", "1.0.0").with_apis(["nine"]);
    let mut params = Map::new();
    params.insert(String::from("length"), json!(9));
    let request = PluginRequest::new(params, Path::new("/tmp/out"), &manifest);

    let value = serde_json::to_value(&request).expect("serialise");
    assert_eq!(
        value,
        json!({
            "params": {"length": 9},
            "output_dir": "/tmp/out",
            "manifest": {"name": "nine", "version": "1.0.0", "apis": ["nine"]}
        })
    );
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

#[test]
fn parse_structured_reply() {
    let reply = PluginReply::parse(
        r#"{"status": "ok", "metrics": {"score": 0.5, "label": "x"}, "artifacts": {"wav": "/o/a.wav"}}"#,
        "",
    );
    let PluginReply::Structured(structured) = &reply else {
        panic!("expected structured reply, got {reply:?}");
    };
    assert_eq!(structured.status(), ReplyStatus::Ok);
    assert_eq!(structured.metrics().get("score"), Some(&json!(0.5)));
    assert_eq!(structured.metrics().get("label"), Some(&json!("x")));
    assert_eq!(
        reply.artifacts().get("wav").map(PathBuf::as_path),
        Some(Path::new("/o/a.wav"))
    );
}

#[test]
fn parse_defaults_missing_fields() {
    let reply = PluginReply::parse("{}\n", "");
    assert_eq!(reply, PluginReply::Structured(StructuredReply::default()));
    assert!(reply.metrics().is_empty());
}

#[test]
fn parse_error_status_keeps_detail() {
    let reply = PluginReply::parse(r#"{"status": "error", "error": {"code": 3}}"#, "");
    let PluginReply::Structured(structured) = reply else {
        panic!("expected structured reply");
    };
    assert_eq!(structured.status(), ReplyStatus::Error);
    assert_eq!(structured.error_detail(), Some(&json!({"code": 3})));
}

#[test]
fn parse_unknown_status_is_tolerated() {
    let reply = PluginReply::parse(r#"{"status": "done"}"#, "");
    let PluginReply::Structured(structured) = reply else {
        panic!("expected structured reply");
    };
    assert_eq!(structured.status(), ReplyStatus::Unknown);
}

#[rstest]
#[case::non_string_artifact(
    r#"{"status": "ok", "metrics": {"score": 0.01}, "artifacts": {"wav": "a.wav", "count": 3}}"#,
    &["wav"]
)]
#[case::null_artifacts(r#"{"metrics": {"score": 0.01}, "artifacts": null}"#, &[])]
#[case::numeric_status(r#"{"status": 1, "metrics": {"score": 0.01}}"#, &[])]
#[case::artifact_list(r#"{"metrics": {"score": 0.01}, "artifacts": ["a.wav"]}"#, &[])]
fn off_shape_fields_keep_the_reported_metrics(#[case] stdout: &str, #[case] artifacts: &[&str]) {
    let reply = PluginReply::parse(stdout, "");
    assert!(
        matches!(reply, PluginReply::Structured(_)),
        "expected structured reply, got {reply:?}"
    );
    assert_eq!(reply.metrics().get("score"), Some(&json!(0.01)));
    let reply_artifacts = reply.artifacts();
    let kept: Vec<&str> = reply_artifacts.keys().map(String::as_str).collect();
    assert_eq!(kept, artifacts);
}

#[rstest]
#[case::null_metrics(r#"{"metrics": null}"#)]
#[case::list_metrics(r#"{"metrics": [1, 2]}"#)]
#[case::string_metrics(r#"{"metrics": "score=1"}"#)]
fn non_object_metrics_read_as_empty(#[case] stdout: &str) {
    let reply = PluginReply::parse(stdout, "");
    let PluginReply::Structured(structured) = &reply else {
        panic!("expected structured reply, got {reply:?}");
    };
    assert_eq!(structured.status(), ReplyStatus::Ok);
    assert!(structured.metrics().is_empty());
}

#[test]
fn numeric_status_is_unknown_and_null_error_is_absent() {
    let reply = PluginReply::parse(r#"{"status": 7, "error": null}"#, "");
    let PluginReply::Structured(structured) = reply else {
        panic!("expected structured reply");
    };
    assert_eq!(structured.status(), ReplyStatus::Unknown);
    assert!(structured.error_detail().is_none());
}

#[rstest]
#[case::plain_text("generated 9 samples\n")]
#[case::empty("")]
#[case::json_array("[1, 2, 3]")]
#[case::json_number("42")]
#[case::truncated(r#"{"metrics": {"score": 1"#)]
fn parse_falls_back_to_raw(#[case] stdout: &str) {
    let reply = PluginReply::parse(stdout, "warning: noisy");
    let PluginReply::Raw(raw) = &reply else {
        panic!("expected raw reply for {stdout:?}, got {reply:?}");
    };
    assert_eq!(raw.text(), stdout);
    assert_eq!(raw.stderr(), "warning: noisy");
    assert!(reply.metrics().is_empty());
    assert!(reply.artifacts().is_empty());
}

#[test]
fn reply_serialisation_is_tagged() {
    let reply = PluginReply::Raw(RawReply::new("hello", ""));
    let value = serde_json::to_value(&reply).expect("serialise");
    assert_eq!(value, json!({"kind": "raw", "text": "hello"}));
}
