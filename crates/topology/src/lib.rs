//! Topology store: networks, node groups, nodes and links.
//!
//! The [`Topology`] owns every record. Reads are lock-free with respect to the
//! lock helper and return clones. Structural mutations (create, delete, move,
//! membership) take the lock helper on the affected `network/<id>` and
//! `group/<id>` keys, in sorted order, then apply the change to a copy of the
//! data that is swapped in only once the change validated and was handed to
//! persistence. A reader therefore never sees a half-applied mutation.

mod error;
mod group;
mod link;
mod network;
mod node;
pub mod store;

use std::sync::Arc;

use parking_lot::RwLock;
use strata_lock::{LockManager, LockOptions};
use tracing::warn;

pub use error::{RecordKind, TopologyError};
pub use node::NodeFilter;
pub use store::{
    FileTopologyStore, MemoryTopologyStore, PersistenceError, TopologyPersistence, TopologySnapshot,
};

/// Lock key of a network's structure.
pub fn network_lock_key(id: &str) -> String {
    format!("network/{id}")
}

/// Lock key of a node group's membership.
pub fn group_lock_key(id: &str) -> String {
    format!("group/{id}")
}

/// Lock key serialising operations on one node.
pub fn node_lock_key(id: &str) -> String {
    format!("node/{id}")
}

/// The topology store.
pub struct Topology {
    data: RwLock<TopologySnapshot>,
    locks: LockManager,
    persistence: Arc<dyn TopologyPersistence>,
}

impl std::fmt::Debug for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.read();
        f.debug_struct("Topology")
            .field("networks", &data.networks.len())
            .field("groups", &data.groups.len())
            .field("nodes", &data.nodes.len())
            .field("links", &data.links.len())
            .finish()
    }
}

impl Topology {
    /// Open a topology backed by `persistence`, loading its last snapshot.
    pub fn new(
        persistence: Arc<dyn TopologyPersistence>,
        locks: LockManager,
    ) -> Result<Self, TopologyError> {
        let data = persistence.load()?.unwrap_or_default();
        Ok(Self {
            data: RwLock::new(data),
            locks,
            persistence,
        })
    }

    /// Empty topology held in memory only.
    pub fn in_memory() -> Self {
        Self {
            data: RwLock::default(),
            locks: LockManager::default(),
            persistence: Arc::new(MemoryTopologyStore::new()),
        }
    }

    /// Lock manager shared with the other components.
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Copy of the whole topology.
    pub fn snapshot(&self) -> TopologySnapshot {
        self.data.read().clone()
    }

    /// Flush the persistence backend.
    pub fn flush(&self) -> Result<(), TopologyError> {
        self.persistence.flush()?;
        Ok(())
    }

    /// Run `apply` on a copy of the data under the lock helper on `keys`.
    ///
    /// The copy replaces the live data only if `apply` and persistence both
    /// succeed.
    pub(crate) async fn mutate<R>(
        &self,
        keys: Vec<String>,
        apply: impl FnOnce(&mut TopologySnapshot) -> Result<R, TopologyError>,
    ) -> Result<R, TopologyError> {
        let _guards = self.locks.acquire_all(keys, LockOptions::default()).await?;

        let mut data = self.data.write();
        let mut next = data.clone();
        let out = apply(&mut next)?;
        self.persistence.save(&next)?;
        *data = next;
        Ok(out)
    }

    /// Apply a single-record update in place, without the lock helper.
    pub(crate) fn update_in_place<R>(
        &self,
        apply: impl FnOnce(&mut TopologySnapshot) -> Result<R, TopologyError>,
    ) -> Result<R, TopologyError> {
        let mut data = self.data.write();
        let out = apply(&mut data)?;
        if let Err(err) = self.persistence.save(&data) {
            warn!(%err, "failed to persist topology update");
            return Err(err.into());
        }
        Ok(out)
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&TopologySnapshot) -> R) -> R {
        f(&self.data.read())
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use strata_primitives::{Network, NodeGroup};

    use super::*;
    use crate::test_utils::{add_node, sample};

    #[tokio::test]
    async fn test_reopen_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.json");

        {
            let store = Arc::new(FileTopologyStore::new(&path).unwrap());
            let topology = Topology::new(store, LockManager::default()).unwrap();
            topology.create_network(Network::root("root", "Root")).await.unwrap();
            add_node(&topology, "n1", "root").await;
            topology
                .create_node_group(NodeGroup::new("g1", "root", "fw"))
                .await
                .unwrap();
            topology.add_nodes_to_group("g1", ["n1"]).await.unwrap();
            topology.flush().unwrap();
        }

        let store = Arc::new(FileTopologyStore::new(&path).unwrap());
        let topology = Topology::new(store, LockManager::default()).unwrap();
        assert!(topology.get_node_group("g1").unwrap().contains("n1"));
        assert_eq!(
            topology
                .get_node_by_id("n1")
                .unwrap()
                .node_group_id("fw")
                .map(|g| g.as_str()),
            Some("g1")
        );
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_data_untouched() {
        let topology = sample().await;
        add_node(&topology, "n1", "east").await;
        topology
            .create_node_group(NodeGroup::new("g1", "east", "fw"))
            .await
            .unwrap();
        let before = topology.snapshot();

        // n1 is valid, ghost is not: nothing may be applied
        assert_matches!(
            topology.add_nodes_to_group("g1", ["n1", "ghost"]).await,
            Err(TopologyError::NotFound { .. })
        );
        assert_eq!(topology.snapshot(), before);
        assert!(!topology.locks().is_locked(&group_lock_key("g1")));
    }
}
