//! Dispatch metrics

use core::fmt;

use metrics::Counter;

use crate::command::CommandKind;
use crate::error::FrameworkError;

#[derive(Clone, Debug)]
pub(crate) struct DispatchMetrics {
    /// Dispatch calls accepted
    pub(crate) requests_total: Counter,
    /// Per-node tasks spawned
    pub(crate) node_tasks_total: Counter,
    /// Per-node tasks finished, including cancelled ones
    pub(crate) finished_node_tasks_total: Counter,
    /// Attempts sent to nodes
    pub(crate) attempts_total: Counter,
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self {
            requests_total: metrics::counter!("dispatch.requests_total"),
            node_tasks_total: metrics::counter!("dispatch.node_tasks_total"),
            finished_node_tasks_total: metrics::counter!("dispatch.finished_node_tasks_total"),
            attempts_total: metrics::counter!("dispatch.attempts_total"),
        }
    }
}

impl DispatchMetrics {
    pub(crate) fn outcome(&self, command: CommandKind, result: Result<(), &FrameworkError>) {
        let outcome = match result {
            Ok(()) => "ok",
            Err(FrameworkError::ServiceTimeout { .. }) => "timeout",
            Err(FrameworkError::NodeDisconnected) => "disconnected",
            Err(FrameworkError::ServiceUnavailable) => "unavailable",
            Err(FrameworkError::ServiceStateNotAllowed(_)) => "not_allowed",
            Err(FrameworkError::NodeBusy) => "busy",
            Err(FrameworkError::Cancelled) => "cancelled",
            Err(FrameworkError::Service(_)) => "service_error",
        };
        metrics::counter!(
            "dispatch.outcomes_total",
            "command" => command.as_ref().to_owned(),
            "outcome" => outcome
        )
        .increment(1);
    }
}

/// Increments a counter when dropped, even if the task panicked.
pub(crate) struct IncCounterOnDrop(Counter);

impl fmt::Debug for IncCounterOnDrop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IncCounterOnDrop").finish()
    }
}

impl IncCounterOnDrop {
    pub(crate) const fn new(counter: Counter) -> Self {
        Self(counter)
    }
}

impl Drop for IncCounterOnDrop {
    fn drop(&mut self) {
        self.0.increment(1);
    }
}
