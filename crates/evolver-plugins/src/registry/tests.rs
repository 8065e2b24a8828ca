//! Unit tests for the plugin registry.

use std::fs;
use std::path::{Path, PathBuf};

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

fn write_plugin(root: &Path, name: &str, manifest: &str) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).expect("create plugin dir");
    fs::write(dir.join(MANIFEST_FILE_NAME), manifest).expect("write manifest");
}

fn entry(name: &str, version: &str) -> PluginEntry {
    PluginEntry::new(
        name,
        PluginManifest::new(name, version).with_apis(["nine"]),
        PathBuf::from(format!("/plugins/{name}")),
    )
}

#[fixture]
fn plugin_root() -> TempDir {
    let root = TempDir::new().expect("temp dir");
    write_plugin(
        root.path(),
        "codex.sequence.nine",
        r#"{"name": "nine", "version": "1.0.0", "apis": ["nine"]}"#,
    );
    write_plugin(
        root.path(),
        "lucas_generator",
        r#"{"version": "0.3.0", "apis": ["lucas"], "capabilities": ["sequence"]}"#,
    );
    write_plugin(root.path(), "broken", "{ this is not json");
    fs::create_dir_all(root.path().join("no_manifest")).expect("create dir");
    fs::write(root.path().join("stray.txt"), "not a plugin").expect("write file");
    root
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

#[test]
fn new_registry_is_empty() {
    let r = PluginRegistry::new();
    assert!(r.is_empty());
    assert_eq!(r.len(), 0);
    assert!(r.warnings().is_empty());
}

#[test]
fn register_and_get() {
    let mut r = PluginRegistry::new();
    assert!(r.register(entry("nine", "1.0.0")).is_none());
    let found = r.get("nine").expect("get nine");
    assert_eq!(found.name(), "nine");
    assert_eq!(found.location(), Path::new("/plugins/nine"));
}

#[test]
fn register_duplicate_replaces_previous() {
    let mut r = PluginRegistry::new();
    r.register(entry("nine", "1.0.0"));
    let previous = r
        .register(entry("nine", "2.0.0"))
        .expect("previous entry returned");
    assert_eq!(previous.manifest().version(), "1.0.0");
    assert_eq!(r.len(), 1);
    assert_eq!(
        r.get("nine").expect("get nine").manifest().version(),
        "2.0.0"
    );
}

#[test]
fn iteration_is_sorted_by_name() {
    let mut r = PluginRegistry::new();
    r.register(entry("zeta", "1"));
    r.register(entry("alpha", "1"));
    r.register(entry("mid", "1"));
    let names: Vec<&str> = r.iter().map(PluginEntry::name).collect();
    assert_eq!(names, ["alpha", "mid", "zeta"]);
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

#[rstest]
fn discover_loads_valid_manifests(plugin_root: TempDir) {
    let r = PluginRegistry::discover([plugin_root.path()]);
    assert_eq!(r.len(), 2);
    let nine = r.get("codex.sequence.nine").expect("nine discovered");
    assert_eq!(nine.manifest().name(), "nine");
    assert_eq!(nine.location(), plugin_root.path().join("codex.sequence.nine"));
    assert!(r.get("lucas_generator").is_some());
}

#[rstest]
fn discover_skips_malformed_manifest_with_warning(plugin_root: TempDir) {
    let r = PluginRegistry::discover([plugin_root.path()]);
    assert!(r.get("broken").is_none());
    assert_eq!(r.warnings().len(), 1);
    let warning = r.warnings().first().expect("one warning");
    assert!(
        matches!(warning, RegistryWarning::InvalidManifest { plugin, .. } if plugin == "broken"),
        "unexpected warning: {warning}"
    );
}

#[rstest]
fn discover_ignores_directories_without_manifest(plugin_root: TempDir) {
    let r = PluginRegistry::discover([plugin_root.path()]);
    assert!(r.get("no_manifest").is_none());
    assert!(r.get("stray.txt").is_none());
}

#[test]
fn discover_missing_root_is_total() {
    let dir = TempDir::new().expect("temp dir");
    let r = PluginRegistry::discover([dir.path().join("absent")]);
    assert!(r.is_empty());
    assert!(matches!(
        r.warnings().first(),
        Some(RegistryWarning::UnreadableRoot { .. })
    ));
}

#[test]
fn later_roots_override_earlier_roots() {
    let first = TempDir::new().expect("temp dir");
    let second = TempDir::new().expect("temp dir");
    write_plugin(first.path(), "nine", r#"{"version": "1.0.0", "apis": ["nine"]}"#);
    write_plugin(second.path(), "nine", r#"{"version": "9.0.0", "apis": ["nine"]}"#);

    let r = PluginRegistry::discover([first.path(), second.path()]);
    let nine = r.get("nine").expect("nine discovered");
    assert_eq!(nine.manifest().version(), "9.0.0");
    assert_eq!(nine.location(), second.path().join("nine"));
}
