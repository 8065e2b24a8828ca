//! Candidate selection and ranking.
//!
//! [`select`] filters the registry down to the plugins able to serve a
//! request and orders them by the policy's [`SelectionRule`]. Ranking is a
//! pure function of the registry snapshot and the request: the registry
//! iterates in name order and the sort is stable, so ties always resolve
//! lexicographically by plugin name.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::NoCandidatesError;
use crate::registry::{PluginEntry, PluginRegistry};

/// Tracing target for selection.
const SELECTION_TARGET: &str = "evolver_plugins::selection";

/// Ordering applied to eligible candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionRule {
    /// Keep registry order (lexicographic by plugin name).
    #[default]
    RegistryOrder,
    /// Highest semantic version first.
    HighestVersion,
}

/// Sort key for dot-separated version strings.
///
/// Each component made solely of ASCII digits compares numerically; any
/// other component counts as zero. Keys compare component by component and a
/// shorter key that is a prefix of a longer one sorts first, so `1.0` ranks
/// below `1.0.0`.
///
/// # Example
///
/// ```
/// use evolver_plugins::selection::VersionKey;
///
/// assert!(VersionKey::parse("2.0.0") > VersionKey::parse("1.10.3"));
/// assert_eq!(VersionKey::parse("1.x.2"), VersionKey::parse("1.0.2"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VersionKey(Vec<u64>);

impl VersionKey {
    /// Parses a version string into a comparable key.
    #[must_use]
    pub fn parse(version: &str) -> Self {
        Self(version.split('.').map(component_value).collect())
    }
}

fn component_value(component: &str) -> u64 {
    if component.is_empty() || !component.bytes().all(|byte| byte.is_ascii_digit()) {
        return 0;
    }
    component.parse().unwrap_or(u64::MAX)
}

/// Returns the eligible candidates for a request, best first.
///
/// A plugin is eligible when it lists `api` among its supported request kinds
/// and declares every tag in `required`.
///
/// # Errors
///
/// Returns [`NoCandidatesError`] when no plugin is eligible.
pub fn select<'r>(
    registry: &'r PluginRegistry,
    api: &str,
    required: &BTreeSet<String>,
    rule: SelectionRule,
) -> Result<Vec<&'r PluginEntry>, NoCandidatesError> {
    let mut candidates: Vec<&PluginEntry> = registry
        .iter()
        .filter(|entry| {
            let manifest = entry.manifest();
            manifest.supports_api(api) && manifest.satisfies(required)
        })
        .collect();

    if candidates.is_empty() {
        return Err(NoCandidatesError {
            api: api.to_owned(),
            capabilities: required.clone(),
        });
    }

    rank(&mut candidates, rule);
    debug!(
        target: SELECTION_TARGET,
        api,
        ?rule,
        candidates = ?candidates.iter().map(|entry| entry.name()).collect::<Vec<_>>(),
        "ranked candidates"
    );
    Ok(candidates)
}

/// Orders candidates in place according to `rule`.
pub fn rank(candidates: &mut [&PluginEntry], rule: SelectionRule) {
    match rule {
        SelectionRule::RegistryOrder => {}
        SelectionRule::HighestVersion => {
            candidates.sort_by_cached_key(|entry| {
                std::cmp::Reverse(VersionKey::parse(entry.manifest().version()))
            });
        }
    }
}
