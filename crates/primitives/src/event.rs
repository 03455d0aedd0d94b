//! State-change notifications.

use serde::{Deserialize, Serialize};

use crate::ids::{NodeId, ServiceName};
use crate::schema::{NodeState, ServiceState};

/// One observed change (or snapshot) of a node's state.
///
/// `service` is `None` for node-level changes of a node without services;
/// otherwise the item carries the state of that service at the time the node
/// state was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStateChange {
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: u64,
    pub node_id: NodeId,
    pub node_state: NodeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_state: Option<ServiceState>,
    /// True for items replayed from the initial snapshot.
    #[serde(default)]
    pub snapshot: bool,
}

impl NodeStateChange {
    /// Returns true if this item reports a service state.
    pub fn is_service_change(&self) -> bool {
        self.service.is_some()
    }
}

/// Current Unix time in milliseconds.
pub fn unix_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Current Unix time in seconds.
pub fn unix_seconds() -> u64 {
    unix_millis() / 1000
}
