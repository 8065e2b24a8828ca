//! Plugin registry for manifest discovery and lookup.
//!
//! The [`PluginRegistry`] maps plugin names to their manifest and on-disk
//! directory. Discovery is total: unreadable or malformed manifests are
//! skipped and recorded as [`RegistryWarning`]s rather than failing the run.
//!
//! A plugin's identity is the name of the directory its manifest was found
//! in. When the same name is registered twice the later entry replaces the
//! earlier one (last-wins); with several discovery roots this means later
//! roots override earlier ones. Iteration is always in lexicographic name
//! order.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::DocumentError;
use crate::manifest::{MANIFEST_FILE_NAME, PluginManifest};

/// Tracing target for registry operations.
const REGISTRY_TARGET: &str = "evolver_plugins::registry";

/// A discovered plugin: its identity, manifest, and directory.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginEntry {
    name: String,
    manifest: PluginManifest,
    location: PathBuf,
}

impl PluginEntry {
    /// Creates an entry for a plugin living in `location`.
    #[must_use]
    pub fn new(name: impl Into<String>, manifest: PluginManifest, location: PathBuf) -> Self {
        Self {
            name: name.into(),
            manifest,
            location,
        }
    }

    /// Returns the plugin's identity.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the parsed manifest.
    #[must_use]
    pub const fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    /// Returns the plugin directory.
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }
}

/// A manifest or root that discovery had to skip.
#[derive(Debug, Clone)]
pub enum RegistryWarning {
    /// A discovery root does not exist or cannot be listed.
    UnreadableRoot {
        /// Root directory.
        root: PathBuf,
        /// Reason reported by the filesystem.
        message: String,
    },
    /// A plugin manifest could not be loaded.
    InvalidManifest {
        /// Directory name of the skipped plugin.
        plugin: String,
        /// Load failure.
        error: DocumentError,
    },
}

impl std::fmt::Display for RegistryWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnreadableRoot { root, message } => {
                write!(f, "plugin root {} skipped: {message}", root.display())
            }
            Self::InvalidManifest { plugin, error } => {
                write!(f, "plugin '{plugin}' skipped: {error}")
            }
        }
    }
}

/// Catalogue of available plugins keyed by name.
///
/// # Example
///
/// ```
/// use evolver_plugins::{PluginEntry, PluginManifest, PluginRegistry};
/// use std::path::PathBuf;
///
/// let mut registry = PluginRegistry::new();
/// let manifest = PluginManifest::new("nine", "1.0.0").with_apis(["nine"]);
/// registry.register(PluginEntry::new("nine", manifest, PathBuf::from("plugins/nine")));
/// assert!(registry.get("nine").is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    entries: BTreeMap<String, PluginEntry>,
    warnings: Vec<RegistryWarning>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Discovers plugins under each root directory in turn.
    ///
    /// Every immediate subdirectory holding a `manifest.json` becomes an
    /// entry named after the subdirectory.
    #[must_use]
    pub fn discover<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut registry = Self::new();
        for root in roots {
            registry.scan_root(root.as_ref());
        }
        debug!(
            target: REGISTRY_TARGET,
            plugins = registry.len(),
            warnings = registry.warnings.len(),
            "plugin discovery finished"
        );
        registry
    }

    fn scan_root(&mut self, root: &Path) {
        let listing = match fs::read_dir(root) {
            Ok(listing) => listing,
            Err(err) => {
                self.warn(RegistryWarning::UnreadableRoot {
                    root: root.to_path_buf(),
                    message: err.to_string(),
                });
                return;
            }
        };

        let mut directories: Vec<(String, PathBuf)> = listing
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter_map(|path| {
                let name = path.file_name()?.to_str()?.to_owned();
                Some((name, path))
            })
            .collect();
        directories.sort();

        for (name, directory) in directories {
            let manifest_path = directory.join(MANIFEST_FILE_NAME);
            if !manifest_path.is_file() {
                debug!(
                    target: REGISTRY_TARGET,
                    plugin = name.as_str(),
                    "directory has no manifest, skipping"
                );
                continue;
            }
            match PluginManifest::load(&manifest_path) {
                Ok(manifest) => {
                    if let Some(previous) =
                        self.register(PluginEntry::new(name.as_str(), manifest, directory))
                    {
                        debug!(
                            target: REGISTRY_TARGET,
                            plugin = name.as_str(),
                            replaced = %previous.location().display(),
                            "later plugin root overrides earlier entry"
                        );
                    }
                }
                Err(error) => self.warn(RegistryWarning::InvalidManifest {
                    plugin: name,
                    error,
                }),
            }
        }
    }

    fn warn(&mut self, warning: RegistryWarning) {
        warn!(target: REGISTRY_TARGET, %warning, "registry entry skipped");
        self.warnings.push(warning);
    }

    /// Registers an entry, returning the entry it replaced, if any.
    pub fn register(&mut self, entry: PluginEntry) -> Option<PluginEntry> {
        self.entries.insert(entry.name().to_owned(), entry)
    }

    /// Looks up a plugin by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PluginEntry> {
        self.entries.get(name)
    }

    /// Iterates over entries in lexicographic name order.
    pub fn iter(&self) -> btree_map::Values<'_, String, PluginEntry> {
        self.entries.values()
    }

    /// Returns the warnings recorded during discovery.
    #[must_use]
    pub fn warnings(&self) -> &[RegistryWarning] {
        &self.warnings
    }

    /// Returns the number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no plugins are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a PluginRegistry {
    type Item = &'a PluginEntry;
    type IntoIter = btree_map::Values<'a, String, PluginEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests;
