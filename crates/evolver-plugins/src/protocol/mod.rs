//! IPC protocol types for orchestrator-plugin communication.
//!
//! The orchestrator writes one [`PluginRequest`] as a JSON line to the
//! plugin's stdin and closes it. The plugin writes its reply to stdout and
//! exits. Plugin stderr is captured for diagnostics but is not part of the
//! protocol.
//!
//! Replies are interpreted leniently: a JSON object is read as a
//! [`StructuredReply`], anything else is kept verbatim as a [`RawReply`] so
//! plugins that are not JSON-disciplined remain usable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::manifest::PluginManifest;

/// Named result metrics. Values are usually numbers but may be any JSON value.
pub type Metrics = BTreeMap<String, Value>;

/// Named output artifacts reported by a plugin.
pub type Artifacts = BTreeMap<String, PathBuf>;

/// Request sent to a plugin on stdin.
///
/// # Example
///
/// ```
/// use evolver_plugins::{PluginManifest, PluginRequest};
/// use serde_json::Map;
/// use std::path::Path;
///
/// let manifest = PluginManifest::new("nine", "1.0.0");
/// let request = PluginRequest::new(Map::new(), Path::new("out"), &manifest);
/// let line = serde_json::to_string(&request).unwrap();
/// assert!(line.contains("\"output_dir\":\"out\""));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginRequest {
    params: Map<String, Value>,
    output_dir: PathBuf,
    manifest: PluginManifest,
}

impl PluginRequest {
    /// Creates a request forwarding `params` and a copy of the manifest.
    #[must_use]
    pub fn new(params: Map<String, Value>, output_dir: &Path, manifest: &PluginManifest) -> Self {
        Self {
            params,
            output_dir: output_dir.to_path_buf(),
            manifest: manifest.clone(),
        }
    }

    /// Returns the forwarded parameters.
    #[must_use]
    pub const fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Returns the directory the plugin should write artifacts into.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Returns the manifest copy sent to the plugin.
    #[must_use]
    pub const fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }
}

/// Status field of a structured reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    /// The plugin completed its work.
    #[default]
    Ok,
    /// The plugin reports that it failed.
    Error,
    /// Any other status string; treated like `ok`.
    #[serde(other)]
    Unknown,
}

/// A reply that parsed as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredReply {
    #[serde(default)]
    status: ReplyStatus,
    #[serde(default)]
    metrics: Metrics,
    #[serde(default)]
    artifacts: Artifacts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

impl StructuredReply {
    /// Creates a successful reply with the given metrics and artifacts.
    #[must_use]
    pub const fn ok(metrics: Metrics, artifacts: Artifacts) -> Self {
        Self {
            status: ReplyStatus::Ok,
            metrics,
            artifacts,
            error: None,
        }
    }

    /// Creates an error reply carrying the plugin's detail.
    #[must_use]
    pub const fn error(detail: Value) -> Self {
        Self {
            status: ReplyStatus::Error,
            metrics: Metrics::new(),
            artifacts: Artifacts::new(),
            error: Some(detail),
        }
    }

    /// Reads a reply object leniently, field by field.
    fn from_object(mut object: Map<String, Value>) -> Self {
        let status = object
            .remove("status")
            .filter(|value| !value.is_null())
            .map_or(ReplyStatus::Ok, |value| {
                serde_json::from_value(value).unwrap_or(ReplyStatus::Unknown)
            });
        let metrics = match object.remove("metrics") {
            Some(Value::Object(entries)) => entries.into_iter().collect(),
            _ => Metrics::new(),
        };
        let artifacts = match object.remove("artifacts") {
            Some(Value::Object(entries)) => entries
                .into_iter()
                .filter_map(|(key, value)| value.as_str().map(|path| (key, PathBuf::from(path))))
                .collect(),
            _ => Artifacts::new(),
        };
        Self {
            status,
            metrics,
            artifacts,
            error: object.remove("error").filter(|value| !value.is_null()),
        }
    }

    /// Returns the reply status.
    #[must_use]
    pub const fn status(&self) -> ReplyStatus {
        self.status
    }

    /// Returns the reported metrics.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Returns the reported artifacts.
    #[must_use]
    pub const fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    /// Returns the error detail, if any.
    #[must_use]
    pub const fn error_detail(&self) -> Option<&Value> {
        self.error.as_ref()
    }
}

/// Output that could not be read as a structured reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReply {
    text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    stderr: String,
}

impl RawReply {
    /// Wraps raw stdout and stderr text.
    #[must_use]
    pub fn new(text: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            stderr: stderr.into(),
        }
    }

    /// Returns the captured stdout text.
    #[must_use]
    pub const fn text(&self) -> &str {
        self.text.as_str()
    }

    /// Returns the captured stderr text.
    #[must_use]
    pub const fn stderr(&self) -> &str {
        self.stderr.as_str()
    }
}

/// A plugin's reply, structured when possible.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PluginReply {
    /// The plugin replied with a JSON object.
    Structured(StructuredReply),
    /// The plugin replied with arbitrary text.
    Raw(RawReply),
}

impl PluginReply {
    /// Interprets captured stdout, falling back to a raw reply.
    ///
    /// # Example
    ///
    /// ```
    /// use evolver_plugins::PluginReply;
    ///
    /// let reply = PluginReply::parse(r#"{"metrics": {"score": 3}}"#, "");
    /// assert!(matches!(reply, PluginReply::Structured(_)));
    ///
    /// let reply = PluginReply::parse("done", "");
    /// assert!(matches!(reply, PluginReply::Raw(_)));
    /// ```
    ///
    /// Any JSON object is structured. Fields are read one by one so a
    /// malformed field never hides the others: non-object `metrics` and
    /// `artifacts` count as empty, non-string artifact paths are dropped, and
    /// an unrecognised `status` reads as [`ReplyStatus::Unknown`].
    #[must_use]
    pub fn parse(stdout: &str, stderr: &str) -> Self {
        match serde_json::from_str::<Value>(stdout.trim()) {
            Ok(Value::Object(object)) => Self::Structured(StructuredReply::from_object(object)),
            _ => Self::Raw(RawReply::new(stdout, stderr)),
        }
    }

    /// Returns the reported metrics; raw replies have none.
    #[must_use]
    pub fn metrics(&self) -> Metrics {
        match self {
            Self::Structured(reply) => reply.metrics().clone(),
            Self::Raw(_) => Metrics::new(),
        }
    }

    /// Returns the reported artifacts; raw replies have none.
    #[must_use]
    pub fn artifacts(&self) -> Artifacts {
        match self {
            Self::Structured(reply) => reply.artifacts().clone(),
            Self::Raw(_) => Artifacts::new(),
        }
    }
}

#[cfg(test)]
mod tests;
