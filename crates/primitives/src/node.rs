//! Node records.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ids::{GroupId, NetworkId, NodeId, ServiceName};
use crate::network::Location;
use crate::schema::{NetIfType, NodeState, NodeType, ServiceConfigSource, ServiceState};

/// Out-of-band management controller credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipmi {
    pub ip: String,
    pub username: String,
    pub key: String,
}

/// Management-plane reachability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Management {
    pub hostname: String,
    pub ip: String,
}

/// Vendor information reported by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub vendor: String,
    pub model: String,
    pub serial_number: String,
}

/// Hardware parameters reported by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceParams {
    pub machine_id: String,
    pub cpu_cores: i64,
    pub memory: i64,
    pub disk: i64,
}

/// A network interface on a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub ip: String,
    #[serde(default)]
    pub kind: NetIfType,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Static device information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipmi: Option<Ipmi>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management: Option<Management>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_params: Option<DeviceParams>,
    #[serde(default)]
    pub interfaces: BTreeMap<String, Interface>,
}

/// Per-service view of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    #[serde(default)]
    pub service_state: ServiceState,
    /// Configuration applied by the last successful start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_config: Option<Bytes>,
    #[serde(default)]
    pub config_source: ServiceConfigSource,
    /// Node-owned configuration override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_config: Option<Bytes>,
    /// Plugin build reported by the node when the service was added.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ServiceInfo {
    /// A freshly installed service awaiting initialisation.
    pub fn installed(version: Option<String>) -> Self {
        Self {
            service_state: ServiceState::Uninitialized,
            version,
            ..Default::default()
        }
    }
}

/// A managed network element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    #[serde(rename = "type", default)]
    pub node_type: NodeType,
    pub network_id: NetworkId,
    /// Owning group per service; a node is in at most one group per service.
    #[serde(default)]
    pub node_groups: BTreeMap<ServiceName, GroupId>,
    /// Unix timestamp (seconds) of registration.
    #[serde(default)]
    pub registered_at: u64,
    #[serde(default)]
    pub node_state: NodeState,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default)]
    pub managed: bool,
    #[serde(default)]
    pub info: NodeInfo,
    #[serde(default)]
    pub services: BTreeMap<ServiceName, ServiceInfo>,
}

impl Node {
    /// Create a node attached to `network`.
    pub fn new(
        id: impl Into<NodeId>,
        node_type: NodeType,
        network: impl Into<NetworkId>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            node_type,
            network_id: network.into(),
            managed: true,
            ..Default::default()
        }
    }

    /// Group owning this node for `service`, if any.
    pub fn node_group_id(&self, service: &str) -> Option<&GroupId> {
        self.node_groups.get(service)
    }

    /// Service view for `service`, if installed.
    pub fn service(&self, service: &str) -> Option<&ServiceInfo> {
        self.services.get(service)
    }

    /// Current state of `service` on this node (`Unavailable` if not installed).
    pub fn service_state(&self, service: &str) -> ServiceState {
        self.services
            .get(service)
            .map(|s| s.service_state)
            .unwrap_or(ServiceState::Unavailable)
    }
}
