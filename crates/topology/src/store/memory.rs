//! In-memory topology store (does not persist across restarts).

use parking_lot::RwLock;

use super::{PersistenceError, TopologyPersistence, TopologySnapshot};

/// In-memory topology store for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryTopologyStore {
    snapshot: RwLock<Option<TopologySnapshot>>,
}

impl MemoryTopologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `snapshot`.
    pub fn with_snapshot(snapshot: TopologySnapshot) -> Self {
        Self {
            snapshot: RwLock::new(Some(snapshot)),
        }
    }
}

impl TopologyPersistence for MemoryTopologyStore {
    fn load(&self) -> Result<Option<TopologySnapshot>, PersistenceError> {
        Ok(self.snapshot.read().clone())
    }

    fn save(&self, snapshot: &TopologySnapshot) -> Result<(), PersistenceError> {
        *self.snapshot.write() = Some(snapshot.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        *self.snapshot.write() = None;
        Ok(())
    }
}
