//! Links between networks and nodes.

use serde::{Deserialize, Serialize};

use crate::ids::{LinkId, NetworkId, NodeId};
use crate::node::Node;

/// Network-level link endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkLinkEndpoint {
    pub network_id: NetworkId,
    pub interface: String,
}

/// Node-level link endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLinkEndpoint {
    pub node_id: NodeId,
    pub interface: String,
}

/// Symmetric link between two networks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkLink {
    pub id: LinkId,
    #[serde(default)]
    pub description: String,
    /// Bandwidth in bits per second, same both ways.
    pub bandwidth: i64,
    pub from: NetworkLinkEndpoint,
    pub to: NetworkLinkEndpoint,
}

/// Symmetric link between two local nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLink {
    pub id: LinkId,
    #[serde(default)]
    pub description: String,
    pub bandwidth: i64,
    pub from: NodeLinkEndpoint,
    pub to: NodeLinkEndpoint,
}

/// Asymmetric link from a local node to a node outside the topology.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalLink {
    pub id: LinkId,
    #[serde(default)]
    pub description: String,
    pub bandwidth: i64,
    pub from: NodeLinkEndpoint,
    /// Opaque record of the remote node.
    pub to: Node,
}

/// Any link kind held by the topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Link {
    Network(NetworkLink),
    Node(NodeLink),
    External(ExternalLink),
}

impl Link {
    /// Identifier of the link.
    pub fn id(&self) -> &LinkId {
        match self {
            Self::Network(l) => &l.id,
            Self::Node(l) => &l.id,
            Self::External(l) => &l.id,
        }
    }

    /// Returns true if a local endpoint of this link is `node`.
    pub fn touches_node(&self, node: &str) -> bool {
        match self {
            Self::Network(_) => false,
            Self::Node(l) => l.from.node_id == node || l.to.node_id == node,
            Self::External(l) => l.from.node_id == node,
        }
    }

    /// Returns true if an endpoint of this link is `network`.
    pub fn touches_network(&self, network: &str) -> bool {
        match self {
            Self::Network(l) => l.from.network_id == network || l.to.network_id == network,
            _ => false,
        }
    }
}
