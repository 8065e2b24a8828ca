//! Plugin manifest types describing plugin identity and capabilities.
//!
//! A [`PluginManifest`] declares everything the orchestrator needs to know
//! about a plugin: the request kinds (`apis`) it serves, the capability tags it
//! satisfies, its entry point, an optional time limit override, and an
//! optional integrity signature.
//!
//! Manifests keep the JSON object they were read from alongside the typed
//! view. Integrity digests are computed over that object, so fields this crate
//! does not interpret are still covered by the signature and numbers hash in
//! exactly the form they were written.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::document::read_document;
use crate::error::DocumentError;

/// File name of the manifest inside each plugin directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Manifest key holding the integrity signature.
pub const SIGNATURE_FIELD: &str = "signature";

/// Entry point assumed when a manifest does not declare `main`.
const DEFAULT_ENTRY_POINT: &str = "main.py";

/// Version assumed when a manifest does not declare one.
const DEFAULT_VERSION: &str = "0.0.0";

#[derive(Debug, Clone, Deserialize)]
struct ManifestFields {
    #[serde(default)]
    name: String,
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    apis: BTreeSet<String>,
    #[serde(default)]
    capabilities: BTreeSet<String>,
    #[serde(default = "default_entry_point")]
    main: PathBuf,
    #[serde(default)]
    runtime: Option<String>,
    #[serde(default)]
    time_limit_s: Option<f64>,
    #[serde(default)]
    signature: Option<String>,
}

fn default_version() -> String {
    String::from(DEFAULT_VERSION)
}

fn default_entry_point() -> PathBuf {
    PathBuf::from(DEFAULT_ENTRY_POINT)
}

/// Declarative description of a plugin.
///
/// # Example
///
/// ```
/// use evolver_plugins::PluginManifest;
///
/// let manifest = PluginManifest::new("nine", "1.0.0")
///     .with_apis(["nine"])
///     .with_capabilities(["audio", "sequence"])
///     .with_runtime("python3");
///
/// assert!(manifest.supports_api("nine"));
/// assert_eq!(manifest.entry_point().to_str(), Some("main.py"));
/// assert!(manifest.signature().is_none());
/// ```
#[derive(Debug, Clone)]
pub struct PluginManifest {
    fields: ManifestFields,
    document: Map<String, Value>,
}

impl PluginManifest {
    /// Creates a manifest with the given name and version and no other
    /// declarations.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let plugin_name: String = name.into();
        let plugin_version: String = version.into();
        let mut document = Map::new();
        document.insert(String::from("name"), Value::String(plugin_name.clone()));
        document.insert(
            String::from("version"),
            Value::String(plugin_version.clone()),
        );
        Self {
            fields: ManifestFields {
                name: plugin_name,
                version: plugin_version,
                apis: BTreeSet::new(),
                capabilities: BTreeSet::new(),
                main: default_entry_point(),
                runtime: None,
                time_limit_s: None,
                signature: None,
            },
            document,
        }
    }

    /// Builds a manifest from the JSON object stored on disk.
    ///
    /// # Errors
    ///
    /// Returns the deserialisation error when a known field has the wrong
    /// type.
    pub fn from_document(document: Map<String, Value>) -> Result<Self, serde_json::Error> {
        let fields = serde_json::from_value(Value::Object(document.clone()))?;
        Ok(Self { fields, document })
    }

    /// Reads and parses a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError`] when the file cannot be read, is not a JSON
    /// object, or declares fields with the wrong type.
    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let document: Map<String, Value> = read_document(path)?;
        Self::from_document(document).map_err(|source| DocumentError::parse(path, source))
    }

    /// Declares the request kinds this plugin serves.
    #[must_use]
    pub fn with_apis<I, S>(mut self, apis: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.apis = apis.into_iter().map(Into::into).collect();
        let listed = string_array(&self.fields.apis);
        self.document.insert(String::from("apis"), listed);
        self
    }

    /// Declares the capability tags this plugin satisfies.
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.capabilities = capabilities.into_iter().map(Into::into).collect();
        let listed = string_array(&self.fields.capabilities);
        self.document.insert(String::from("capabilities"), listed);
        self
    }

    /// Overrides the entry point, relative to the plugin directory.
    #[must_use]
    pub fn with_entry_point(mut self, entry_point: impl Into<PathBuf>) -> Self {
        self.fields.main = entry_point.into();
        let text = self.fields.main.to_string_lossy().into_owned();
        self.document.insert(String::from("main"), Value::String(text));
        self
    }

    /// Declares the interpreter used to launch the entry point.
    #[must_use]
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        let interpreter: String = runtime.into();
        self.document
            .insert(String::from("runtime"), Value::String(interpreter.clone()));
        self.fields.runtime = Some(interpreter);
        self
    }

    /// Overrides the policy's default time limit for this plugin.
    #[must_use]
    pub fn with_time_limit_secs(mut self, seconds: f64) -> Self {
        self.fields.time_limit_s = Some(seconds);
        self.document
            .insert(String::from("time_limit_s"), Value::from(seconds));
        self
    }

    /// Attaches an integrity signature.
    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        let digest: String = signature.into();
        self.document
            .insert(String::from(SIGNATURE_FIELD), Value::String(digest.clone()));
        self.fields.signature = Some(digest);
        self
    }

    /// Returns the declared name, which may differ from the directory name
    /// the registry uses as the plugin's identity.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.fields.name.as_str()
    }

    /// Returns the version string.
    #[must_use]
    pub const fn version(&self) -> &str {
        self.fields.version.as_str()
    }

    /// Returns the supported request kinds.
    #[must_use]
    pub const fn apis(&self) -> &BTreeSet<String> {
        &self.fields.apis
    }

    /// Returns the capability tags.
    #[must_use]
    pub const fn capabilities(&self) -> &BTreeSet<String> {
        &self.fields.capabilities
    }

    /// Returns the entry point exactly as declared.
    #[must_use]
    pub fn entry_point(&self) -> &Path {
        &self.fields.main
    }

    /// Returns the interpreter, if one is declared.
    #[must_use]
    pub fn runtime(&self) -> Option<&str> {
        self.fields.runtime.as_deref()
    }

    /// Returns the time limit override in seconds, if one is declared.
    #[must_use]
    pub const fn time_limit_secs(&self) -> Option<f64> {
        self.fields.time_limit_s
    }

    /// Returns the stored signature, if any.
    #[must_use]
    pub fn signature(&self) -> Option<&str> {
        self.fields.signature.as_deref()
    }

    /// Returns the JSON object the manifest was built from.
    #[must_use]
    pub const fn document(&self) -> &Map<String, Value> {
        &self.document
    }

    /// Returns `true` when the plugin serves the given request kind.
    #[must_use]
    pub fn supports_api(&self, api: &str) -> bool {
        self.fields.apis.contains(api)
    }

    /// Returns `true` when every required tag is declared by the plugin.
    #[must_use]
    pub fn satisfies(&self, required: &BTreeSet<String>) -> bool {
        self.fields.capabilities.is_superset(required)
    }
}

impl PartialEq for PluginManifest {
    fn eq(&self, other: &Self) -> bool {
        self.document == other.document
    }
}

impl Serialize for PluginManifest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.document.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PluginManifest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let document = Map::deserialize(deserializer)?;
        Self::from_document(document).map_err(serde::de::Error::custom)
    }
}

fn string_array(values: &BTreeSet<String>) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}
