//! JSON file-based topology store with atomic writes.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::{PersistenceError, TopologyPersistence, TopologySnapshot};

/// Topology kept as one pretty-printed JSON document. The file is read once
/// on open; saves stay in memory until [`TopologyPersistence::flush`] or drop.
#[derive(Debug)]
pub struct FileTopologyStore {
    path: PathBuf,
    snapshot: RwLock<Option<TopologySnapshot>>,
    dirty: Mutex<bool>,
}

impl FileTopologyStore {
    /// Open `path`. A missing file yields an empty store; nothing is written yet.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let snapshot = if path.exists() {
            Some(Self::load_from_file(&path)?)
        } else {
            None
        };

        Ok(Self {
            path,
            snapshot: RwLock::new(snapshot),
            dirty: Mutex::new(false),
        })
    }

    /// Like [`Self::new`], creating missing parent directories first.
    pub fn new_with_create_dir(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::new(path)
    }

    fn load_from_file(path: &Path) -> Result<TopologySnapshot, PersistenceError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| PersistenceError::Serialization(e.to_string()))
    }

    fn save_to_file(&self) -> Result<(), PersistenceError> {
        let snapshot = self.snapshot.read();

        // readers never see a half-written file
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let file = File::create(&tmp_path)?;
            let writer = BufWriter::new(file);
            match snapshot.as_ref() {
                Some(snapshot) => serde_json::to_writer_pretty(writer, snapshot),
                None => serde_json::to_writer_pretty(writer, &TopologySnapshot::default()),
            }
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        }

        fs::rename(&tmp_path, &self.path)?;
        debug!(path = %self.path.display(), "topology written");
        Ok(())
    }

    fn mark_dirty(&self) {
        *self.dirty.lock() = true;
    }

    pub fn is_dirty(&self) -> bool {
        *self.dirty.lock()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TopologyPersistence for FileTopologyStore {
    fn load(&self) -> Result<Option<TopologySnapshot>, PersistenceError> {
        Ok(self.snapshot.read().clone())
    }

    fn save(&self, snapshot: &TopologySnapshot) -> Result<(), PersistenceError> {
        *self.snapshot.write() = Some(snapshot.clone());
        self.mark_dirty();
        Ok(())
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        *self.snapshot.write() = None;
        self.mark_dirty();
        Ok(())
    }

    fn flush(&self) -> Result<(), PersistenceError> {
        if self.is_dirty() {
            self.save_to_file()?;
            *self.dirty.lock() = false;
        }
        Ok(())
    }
}

impl Drop for FileTopologyStore {
    fn drop(&mut self) {
        if self.is_dirty() {
            if let Err(err) = self.save_to_file() {
                warn!(path = %self.path.display(), %err, "failed to write topology on drop");
            }
        }
    }
}
