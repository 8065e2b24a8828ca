//! Loading helpers for the JSON documents the orchestrator consumes.
//!
//! Manifests, policies, and request documents are all single JSON values on
//! disk. [`read_document`] reads and deserialises one, attaching the path to
//! any failure so callers can report which file was at fault.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::DocumentError;

/// Reads the file at `path` and deserialises it as JSON.
///
/// # Errors
///
/// Returns [`DocumentError::Read`] when the file cannot be read and
/// [`DocumentError::Parse`] when its contents do not deserialise into `T`.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T, DocumentError> {
    let text = fs::read_to_string(path).map_err(|source| DocumentError::read(path, source))?;
    serde_json::from_str(&text).map_err(|source| DocumentError::parse(path, source))
}
