//! Run policy: ranking, trust, limits, thresholds, and post-processing.
//!
//! Every section of the policy document is optional. A missing section takes
//! its default: registry order, signatures not required, a 15 second time
//! limit, no thresholds, an empty chain, and isolated trial directories.
//!
//! ```json
//! {
//!   "selection": {"prefer": "highest_version"},
//!   "security": {"require_signatures": true},
//!   "limits": {"time_s": 15.0},
//!   "thresholds": {"min": {"order_k2": 0.1}, "max": {"latency_ms": 5000}},
//!   "post_chain": [{"plugin": "codex.analysis.order_meter"}],
//!   "output": {"isolate_trials": true}
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chain::ChainStep;
use crate::document::read_document;
use crate::error::DocumentError;
use crate::selection::SelectionRule;
use crate::threshold::Thresholds;

/// Time limit applied when neither the policy nor the manifest sets one.
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(15);

/// Candidate ranking preferences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionPolicy {
    /// Ordering rule for eligible candidates.
    pub prefer: SelectionRule,
}

/// Trust requirements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    /// Reject candidates and chain plugins whose manifests do not verify.
    pub require_signatures: bool,
}

/// Resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsPolicy {
    /// Default per-plugin wall-clock limit in seconds.
    pub time_s: f64,
}

impl Default for LimitsPolicy {
    fn default() -> Self {
        Self {
            time_s: DEFAULT_TIME_LIMIT.as_secs_f64(),
        }
    }
}

impl LimitsPolicy {
    /// Returns the configured limit, or [`DEFAULT_TIME_LIMIT`] when the
    /// configured value is negative or not finite.
    #[must_use]
    pub fn time_limit(&self) -> Duration {
        Duration::try_from_secs_f64(self.time_s).unwrap_or(DEFAULT_TIME_LIMIT)
    }
}

/// Output layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputPolicy {
    /// Give every trial its own directory under `trials/`.
    pub isolate_trials: bool,
}

impl Default for OutputPolicy {
    fn default() -> Self {
        Self {
            isolate_trials: true,
        }
    }
}

/// A complete run policy.
///
/// # Example
///
/// ```
/// use evolver_plugins::Policy;
/// use evolver_plugins::selection::SelectionRule;
///
/// let policy: Policy = serde_json::from_str(
///     r#"{"selection": {"prefer": "highest_version"}}"#,
/// ).unwrap();
/// assert_eq!(policy.selection.prefer, SelectionRule::HighestVersion);
/// assert!(!policy.security.require_signatures);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Candidate ranking.
    pub selection: SelectionPolicy,
    /// Trust requirements.
    pub security: SecurityPolicy,
    /// Resource limits.
    pub limits: LimitsPolicy,
    /// Metric bounds a candidate must satisfy.
    pub thresholds: Thresholds,
    /// Steps run after each successful primary execution.
    pub post_chain: Vec<ChainStep>,
    /// Output layout.
    pub output: OutputPolicy,
}

impl Policy {
    /// Loads a policy document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError`] if the file cannot be read or is not a valid
    /// policy.
    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        read_document(path)
    }
}
