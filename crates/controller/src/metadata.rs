//! Named metadata files per service and topology layer.

use std::collections::BTreeMap;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strata_primitives::ServiceName;
use strata_topology::{RecordKind, Topology, TopologyError};

/// Record a metadata file is attached to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MetadataLayer {
    Network,
    NodeGroup,
    Node,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetadataKey {
    pub layer: MetadataLayer,
    pub id: String,
    pub service: ServiceName,
    pub file: String,
}

impl MetadataKey {
    pub fn new(
        layer: MetadataLayer,
        id: impl Into<String>,
        service: impl Into<ServiceName>,
        file: impl Into<String>,
    ) -> Self {
        Self {
            layer,
            id: id.into(),
            service: service.into(),
            file: file.into(),
        }
    }
}

impl std::fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}/{}", self.layer, self.id, self.service, self.file)
    }
}

/// Fail unless the record a metadata file names exists.
pub(crate) fn check_record(topology: &Topology, layer: MetadataLayer, id: &str) -> Result<(), TopologyError> {
    let (exists, kind) = match layer {
        MetadataLayer::Network => (topology.network_exists(id), RecordKind::Network),
        MetadataLayer::NodeGroup => (topology.get_node_group(id).is_ok(), RecordKind::NodeGroup),
        MetadataLayer::Node => (topology.node_exists(id), RecordKind::Node),
    };
    if exists {
        Ok(())
    } else {
        Err(TopologyError::NotFound {
            kind,
            id: id.to_owned(),
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct MetadataStore {
    files: RwLock<BTreeMap<MetadataKey, Bytes>>,
}

impl MetadataStore {
    /// Store `content`, returning the previous content.
    pub(crate) fn set(&self, key: MetadataKey, content: Bytes) -> Option<Bytes> {
        self.files.write().insert(key, content)
    }

    pub(crate) fn get(&self, key: &MetadataKey) -> Option<Bytes> {
        self.files.read().get(key).cloned()
    }

    pub(crate) fn delete(&self, key: &MetadataKey) -> Option<Bytes> {
        self.files.write().remove(key)
    }

    /// File names stored for `service` on one record.
    pub(crate) fn list(&self, layer: MetadataLayer, id: &str, service: &str) -> Vec<String> {
        self.files
            .read()
            .keys()
            .filter(|k| k.layer == layer && k.id == id && k.service == service)
            .map(|k| k.file.clone())
            .collect()
    }

    /// Drop every file of a removed record.
    pub(crate) fn remove_record(&self, layer: MetadataLayer, id: &str) -> usize {
        let mut files = self.files.write();
        let before = files.len();
        files.retain(|k, _| !(k.layer == layer && k.id == id));
        before - files.len()
    }

    /// Drop every file of `service` on one record.
    pub(crate) fn remove_service(&self, layer: MetadataLayer, id: &str, service: &str) {
        self.files
            .write()
            .retain(|k, _| !(k.layer == layer && k.id == id && k.service == service));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_are_scoped_by_record_and_service() {
        let store = MetadataStore::default();
        let key = |id: &str, service: &str, file: &str| MetadataKey::new(MetadataLayer::Node, id, service, file);

        store.set(key("n1", "fw", "rules.json"), Bytes::from_static(b"[]"));
        store.set(key("n1", "fw", "zones.json"), Bytes::from_static(b"{}"));
        store.set(key("n1", "dns", "zones.json"), Bytes::from_static(b"{}"));
        store.set(key("n2", "fw", "rules.json"), Bytes::from_static(b"[1]"));

        assert_eq!(store.list(MetadataLayer::Node, "n1", "fw"), ["rules.json", "zones.json"]);
        assert!(store.list(MetadataLayer::NodeGroup, "n1", "fw").is_empty());

        store.remove_service(MetadataLayer::Node, "n1", "fw");
        assert!(store.get(&key("n1", "fw", "rules.json")).is_none());
        assert_eq!(store.remove_record(MetadataLayer::Node, "n1"), 1);
        assert_eq!(store.get(&key("n2", "fw", "rules.json")), Some(Bytes::from_static(b"[1]")));
        assert_eq!(key("n2", "fw", "rules.json").to_string(), "node/n2/fw/rules.json");
    }
}
