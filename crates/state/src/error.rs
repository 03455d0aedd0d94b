use strata_primitives::{NodeId, NodeState};
use strata_topology::TopologyError;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("node state changes already subscribed")]
    AlreadySubscribed,
    #[error("node not tracked: {0}")]
    NotFound(NodeId),
    #[error("node {node}: {action} not allowed in state {state}")]
    InvalidTransition {
        node: NodeId,
        state: NodeState,
        action: &'static str,
    },
    #[error(transparent)]
    Topology(#[from] TopologyError),
}
