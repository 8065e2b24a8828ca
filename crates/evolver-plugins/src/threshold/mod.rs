//! Metric bounds applied to a candidate's merged metrics.
//!
//! A bound only constrains a metric that is present: absent metrics pass.
//! A bounded metric that is present but not a number violates its bound.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::Metrics;

/// Which side of a bound was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundKind {
    /// The metric fell below its minimum.
    Min,
    /// The metric exceeded its maximum.
    Max,
}

/// Minimum and maximum bounds keyed by metric name.
///
/// # Example
///
/// ```
/// use evolver_plugins::threshold::Thresholds;
/// use serde_json::json;
///
/// let thresholds = Thresholds::default().with_max("latency_ms", 100.0);
/// let mut metrics = evolver_plugins::Metrics::new();
/// metrics.insert("latency_ms".into(), json!(250.0));
/// assert!(!thresholds.passes(&metrics));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Thresholds {
    #[serde(default)]
    min: BTreeMap<String, f64>,
    #[serde(default)]
    max: BTreeMap<String, f64>,
}

impl Thresholds {
    /// Adds or replaces a minimum bound.
    #[must_use]
    pub fn with_min(mut self, metric: impl Into<String>, bound: f64) -> Self {
        self.min.insert(metric.into(), bound);
        self
    }

    /// Adds or replaces a maximum bound.
    #[must_use]
    pub fn with_max(mut self, metric: impl Into<String>, bound: f64) -> Self {
        self.max.insert(metric.into(), bound);
        self
    }

    /// Returns `true` when no bounds are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.is_empty() && self.max.is_empty()
    }

    /// Returns every bound `metrics` violates, maximum bounds first.
    #[must_use]
    pub fn violations(&self, metrics: &Metrics) -> Vec<Violation> {
        let upper = self
            .max
            .iter()
            .filter_map(|(name, &bound)| check(metrics, name, bound, BoundKind::Max));
        let lower = self
            .min
            .iter()
            .filter_map(|(name, &bound)| check(metrics, name, bound, BoundKind::Min));
        upper.chain(lower).collect()
    }

    /// Returns `true` when `metrics` violates no bound.
    #[must_use]
    pub fn passes(&self, metrics: &Metrics) -> bool {
        self.violations(metrics).is_empty()
    }
}

fn check(metrics: &Metrics, name: &str, bound: f64, kind: BoundKind) -> Option<Violation> {
    let actual = metrics.get(name)?;
    let within = actual.as_f64().is_some_and(|value| match kind {
        BoundKind::Max => value <= bound,
        BoundKind::Min => value >= bound,
    });
    (!within).then(|| Violation {
        metric: name.to_owned(),
        kind,
        bound,
        actual: actual.clone(),
    })
}

/// A metric outside its configured bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Metric name.
    pub metric: String,
    /// Which bound was crossed.
    pub kind: BoundKind,
    /// The configured bound.
    pub bound: f64,
    /// The observed value.
    pub actual: Value,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let relation = match self.kind {
            BoundKind::Min => "below minimum",
            BoundKind::Max => "above maximum",
        };
        write!(f, "{}={} {relation} {}", self.metric, self.actual, self.bound)
    }
}
