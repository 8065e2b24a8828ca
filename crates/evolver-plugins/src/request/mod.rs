//! Evolution requests: what the caller needs a plugin to do.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::read_document;
use crate::error::DocumentError;

/// A request naming the required request kind, the capability tags a plugin
/// must declare, and opaque parameters forwarded to the chosen plugin.
///
/// ```json
/// {"api": "nine", "capabilities": ["audio"], "params": {"length": 9}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvolutionRequest {
    /// Required request kind.
    pub api: String,
    /// Required capability tags.
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Parameters forwarded to the plugin unchanged.
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl EvolutionRequest {
    /// Creates a request for `api` with no capability requirements.
    #[must_use]
    pub fn new(api: impl Into<String>) -> Self {
        Self {
            api: api.into(),
            capabilities: BTreeSet::new(),
            params: Map::new(),
        }
    }

    /// Adds required capability tags.
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    /// Adds a forwarded parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Loads a request document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError`] if the file cannot be read, is not JSON, or
    /// lacks an `api`.
    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        read_document(path)
    }
}
