//! State transition metrics.

use metrics::Counter;
use strata_primitives::{NodeState, ServiceState};

/// Counters of observed transitions, labelled by target state.
#[derive(Clone, Debug, Default)]
pub(crate) struct StateMetrics;

impl StateMetrics {
    fn node_counter(state: NodeState) -> Counter {
        metrics::counter!("state.node_transitions_total", "state" => state.to_string())
    }

    fn service_counter(state: ServiceState) -> Counter {
        metrics::counter!("state.service_transitions_total", "state" => state.to_string())
    }

    pub(crate) fn node_transition(&self, state: NodeState) {
        Self::node_counter(state).increment(1);
    }

    pub(crate) fn service_transition(&self, state: ServiceState) {
        Self::service_counter(state).increment(1);
    }

    pub(crate) fn liveness_timeouts(&self, count: usize) {
        metrics::counter!("state.liveness_timeouts_total").increment(count as u64);
    }
}
