//! Topology persistence trait and implementations (memory, file).

mod file;
mod memory;

use std::collections::BTreeMap;

use auto_impl::auto_impl;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strata_primitives::{GroupId, Link, LinkId, Network, NetworkId, Node, NodeGroup, NodeId, ServiceName};
use thiserror::Error;

pub use file::FileTopologyStore;
pub use memory::MemoryTopologyStore;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Everything the topology owns, in the form it is persisted.
///
/// Networks are stored with parent links only; `children` stays empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    #[serde(default)]
    pub networks: BTreeMap<NetworkId, Network>,
    #[serde(default)]
    pub groups: BTreeMap<GroupId, NodeGroup>,
    #[serde(default)]
    pub nodes: BTreeMap<NodeId, Node>,
    #[serde(default)]
    pub links: BTreeMap<LinkId, Link>,
    /// Network-level service configuration layer.
    #[serde(default)]
    pub network_configs: BTreeMap<NetworkId, BTreeMap<ServiceName, Bytes>>,
}

/// Topology persistence with auto-impl for &, Box, Arc.
#[auto_impl(&, Box, Arc)]
pub trait TopologyPersistence: Send + Sync {
    /// Load the last saved snapshot, if any.
    fn load(&self) -> Result<Option<TopologySnapshot>, PersistenceError>;

    /// Record `snapshot` as the current state.
    fn save(&self, snapshot: &TopologySnapshot) -> Result<(), PersistenceError>;

    fn clear(&self) -> Result<(), PersistenceError>;

    fn flush(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}
