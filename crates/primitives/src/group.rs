//! Node groups.

use std::collections::BTreeSet;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ids::{GroupId, NetworkId, NodeId, ServiceName};

/// A set of nodes of one network sharing a service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroup {
    pub id: GroupId,
    pub network_id: NetworkId,
    /// Service this group configures.
    pub service: ServiceName,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub node_ids: BTreeSet<NodeId>,
    /// Group-level service configuration.
    #[serde(default)]
    pub config: Bytes,
}

impl NodeGroup {
    /// Create an empty group.
    pub fn new(
        id: impl Into<GroupId>,
        network: impl Into<NetworkId>,
        service: impl Into<ServiceName>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            network_id: network.into(),
            service: service.into(),
            ..Default::default()
        }
    }

    /// Returns true if `node` is a member.
    pub fn contains(&self, node: &str) -> bool {
        self.node_ids.contains(node)
    }
}
