//! Crate-level integration and BDD tests.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::error::ExecutionError;
use crate::protocol::{Artifacts, Metrics, PluginReply, PluginRequest, StructuredReply};
use crate::registry::PluginEntry;
use crate::runner::{ExecutionResult, PluginExecutor};

mod behaviour;

/// Scripted behaviour of one plugin.
#[derive(Debug, Clone)]
enum Replay {
    Metrics(Metrics),
    Timeout,
}

/// Executor that replays scripted outcomes and records which plugins ran.
#[derive(Debug, Default)]
struct ReplayExecutor {
    replays: BTreeMap<String, Replay>,
    executed: RefCell<Vec<String>>,
}

impl ReplayExecutor {
    fn set_metric(&mut self, plugin: &str, metric: &str, value: Value) {
        let entry = self
            .replays
            .entry(plugin.to_owned())
            .or_insert_with(|| Replay::Metrics(Metrics::new()));
        if let Replay::Metrics(metrics) = entry {
            metrics.insert(metric.to_owned(), value);
        } else {
            *entry = Replay::Metrics(Metrics::from([(metric.to_owned(), value)]));
        }
    }

    fn set_timeout(&mut self, plugin: &str) {
        self.replays.insert(plugin.to_owned(), Replay::Timeout);
    }
}

impl PluginExecutor for ReplayExecutor {
    fn execute(
        &self,
        entry: &PluginEntry,
        _request: &PluginRequest,
        time_limit: Duration,
    ) -> Result<ExecutionResult, ExecutionError> {
        self.executed.borrow_mut().push(entry.name().to_owned());
        match self.replays.get(entry.name()) {
            Some(Replay::Metrics(metrics)) => Ok(ExecutionResult::new(
                entry.name(),
                PluginReply::Structured(StructuredReply::ok(metrics.clone(), Artifacts::new())),
                Duration::from_millis(1),
            )),
            Some(Replay::Timeout) => Err(ExecutionError::Timeout {
                name: entry.name().to_owned(),
                limit: time_limit,
            }),
            None => Ok(ExecutionResult::new(
                entry.name(),
                PluginReply::parse("{}", ""),
                Duration::from_millis(1),
            )),
        }
    }
}
