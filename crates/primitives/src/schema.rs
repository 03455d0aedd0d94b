//! Versioned enum schema shared by the controller, service nodes and plugins.
//!
//! Every enum here carries an explicit, stable discriminant. Values are never
//! renumbered: a new revision of the schema may only append variants and bump
//! [`SCHEMA_VERSION`]. Decoding an unknown discriminant fails with
//! [`SchemaError`] instead of silently mapping to a default.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// Revision of the enum schema defined in this module.
pub const SCHEMA_VERSION: u32 = 25;

/// Failure to decode a raw schema value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct SchemaError {
    /// Name of the enum that failed to decode.
    pub kind: &'static str,
    /// The offending raw value.
    pub value: u8,
}

macro_rules! impl_schema_u8 {
    ($($ty:ident)+) => {$(
        impl $ty {
            /// Decode from the stable wire discriminant.
            pub fn from_u8(value: u8) -> Result<Self, SchemaError> {
                Self::try_from_primitive(value).map_err(|_| SchemaError {
                    kind: stringify!($ty),
                    value,
                })
            }

            /// The stable wire discriminant.
            pub fn as_u8(self) -> u8 {
                self.into()
            }
        }
    )+};
}

/// Liveness and administrative state of a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(strum::Display, strum::EnumString, strum::EnumIter, strum::EnumCount)]
#[derive(TryFromPrimitive, IntoPrimitive)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum NodeState {
    /// Created but registration has not completed.
    #[default]
    Unregistered = 0,
    /// Registered, no recent heartbeat.
    Offline = 1,
    /// Registered and heartbeating.
    Online = 2,
    /// Operator-initiated; suppresses dispatch and liveness transitions.
    Maintenance = 3,
}

impl NodeState {
    /// Returns true if commands may be dispatched to a node in this state.
    pub const fn accepts_commands(&self) -> bool {
        matches!(self, NodeState::Online)
    }

    /// Returns true if the liveness monitor may move the node between
    /// `Online` and `Offline`.
    pub const fn is_liveness_driven(&self) -> bool {
        matches!(self, NodeState::Online | NodeState::Offline)
    }
}

/// Lifecycle state of one service on one node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(strum::Display, strum::EnumString, strum::EnumIter, strum::EnumCount)]
#[derive(TryFromPrimitive, IntoPrimitive)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ServiceState {
    /// The service is not installed on the node.
    #[default]
    Unavailable = 0,
    /// Installed, not yet initialised.
    Uninitialized = 1,
    /// Initialised and idle.
    Initialized = 2,
    /// A start is in flight.
    Configuring = 3,
    /// Started with a configuration.
    Running = 4,
    /// Failed permanently; only an operator command recovers it.
    Malfunctioning = 5,
}

impl ServiceState {
    /// Returns true if the service exists on the node.
    pub const fn is_available(&self) -> bool {
        !matches!(self, ServiceState::Unavailable)
    }

    /// Returns true if runtime operations may be applied in this state.
    pub const fn accepts_ops(&self) -> bool {
        matches!(
            self,
            ServiceState::Initialized
                | ServiceState::Configuring
                | ServiceState::Running
                | ServiceState::Malfunctioning
        )
    }
}

/// Kind of managed network element.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(strum::Display, strum::EnumString, strum::EnumIter, strum::AsRefStr)]
#[derive(TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum NodeType {
    #[strum(serialize = "router")]
    #[serde(rename = "router")]
    Router = 0,
    #[strum(serialize = "switch")]
    #[serde(rename = "switch")]
    Switch = 1,
    #[strum(serialize = "appliance")]
    #[serde(rename = "appliance")]
    Appliance = 2,
    #[strum(serialize = "firewall")]
    #[serde(rename = "firewall")]
    Firewall = 3,
    #[strum(serialize = "lb")]
    #[serde(rename = "lb")]
    LoadBalancer = 4,
    #[strum(serialize = "ap")]
    #[serde(rename = "ap")]
    AccessPoint = 5,
    #[strum(serialize = "device")]
    #[serde(rename = "device")]
    Device = 6,
    #[default]
    #[strum(serialize = "server")]
    #[serde(rename = "server")]
    Server = 7,
}

/// Breadth selector for a dispatched command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(strum::Display, strum::EnumString, strum::EnumIter)]
#[derive(TryFromPrimitive, IntoPrimitive)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ServiceScope {
    /// Nodes directly attached to the target networks.
    Network = 1,
    /// Nodes of the target networks and all their descendants.
    NetworkWithSubnetworks = 2,
    /// Members of the target node groups.
    NodeGroup = 3,
    /// The target nodes themselves.
    Node = 4,
}

/// Where the effective configuration of a node's service instance comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(strum::Display, strum::EnumString)]
#[derive(TryFromPrimitive, IntoPrimitive)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ServiceConfigSource {
    /// The node carries its own override.
    Node = 1,
    /// Inherited from the node group (and the layers below it).
    #[default]
    NodeGroup = 2,
}

/// Role of a node interface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(strum::Display, strum::EnumString)]
#[derive(TryFromPrimitive, IntoPrimitive)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum NetIfType {
    #[default]
    Data = 0,
    Control = 1,
    Management = 2,
}

/// Fixed, ordered vocabulary of location tiers, coarsest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(strum::Display, strum::EnumString, strum::EnumIter, strum::EnumCount)]
#[derive(TryFromPrimitive, IntoPrimitive)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LocationTier {
    World = 0,
    Country = 1,
    State = 2,
    City = 3,
    District = 4,
    Campus = 5,
    Building = 6,
    Floor = 7,
    Room = 8,
    Row = 9,
    Rack = 10,
    Unit = 11,
}

impl LocationTier {
    /// Returns true if `tiers` is strictly increasing, i.e. an ordered
    /// subsequence of the vocabulary without repeats.
    pub fn is_ordered(tiers: &[LocationTier]) -> bool {
        tiers.windows(2).all(|w| matches!(w, [a, b] if a < b))
    }
}

impl_schema_u8!(NodeState ServiceState NodeType ServiceScope ServiceConfigSource NetIfType LocationTier);
