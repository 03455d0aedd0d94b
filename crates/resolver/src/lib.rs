//! Effective service configuration.
//!
//! Layers, most specific first:
//!
//! 1. the node-owned override, while the node's config source is `Node`
//! 2. the config of the node group owning the node for the service
//! 3. the nearest network config from the node's network up to the root
//! 4. the service's registered default
//!
//! Empty layers are skipped. Resolution is read-only and uncached.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strata_lock::{LockError, LockGuard, LockOptions};
use strata_primitives::{GroupId, NetworkId, ServiceConfigSource, ServiceName};
use strata_topology::{Topology, TopologyError};
use tracing::{debug, trace};

#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Layer an effective config was taken from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(tag = "layer", content = "id", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConfigOrigin {
    Node,
    NodeGroup(GroupId),
    Network(NetworkId),
    Default,
    Empty,
}

/// A resolved configuration and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub bytes: Bytes,
    pub origin: ConfigOrigin,
}

impl EffectiveConfig {
    fn from_layer(bytes: Bytes, origin: ConfigOrigin) -> Option<Self> {
        (!bytes.is_empty()).then_some(Self { bytes, origin })
    }

    fn empty() -> Self {
        Self {
            bytes: Bytes::new(),
            origin: ConfigOrigin::Empty,
        }
    }
}

/// Resolves and writes the configuration layers.
#[derive(Debug)]
pub struct ConfigResolver {
    topology: Arc<Topology>,
    defaults: RwLock<HashMap<ServiceName, Bytes>>,
}

impl ConfigResolver {
    pub fn new(topology: Arc<Topology>) -> Self {
        Self {
            topology,
            defaults: RwLock::default(),
        }
    }

    /// Effective configuration of `service` on `node`.
    pub fn resolve(&self, node: &str, service: &str) -> Result<EffectiveConfig, ResolverError> {
        let record = self.topology.get_node_by_id(node)?;

        if let Some(info) = record.service(service) {
            if info.config_source == ServiceConfigSource::Node {
                if let Some(found) = info
                    .node_config
                    .clone()
                    .and_then(|bytes| EffectiveConfig::from_layer(bytes, ConfigOrigin::Node))
                {
                    trace!(%node, %service, "config from node override");
                    return Ok(found);
                }
            }
        }

        if let Some(group_id) = record.node_group_id(service) {
            let group = self.topology.get_node_group(group_id.as_str())?;
            if let Some(found) =
                EffectiveConfig::from_layer(group.config, ConfigOrigin::NodeGroup(group.id))
            {
                trace!(%node, %service, "config from node group");
                return Ok(found);
            }
        }

        for network in self
            .topology
            .network_path_to_root(record.network_id.as_str())?
        {
            if let Some(found) = self
                .topology
                .network_config(network.as_str(), service)
                .and_then(|bytes| EffectiveConfig::from_layer(bytes, ConfigOrigin::Network(network)))
            {
                trace!(%node, %service, "config from network");
                return Ok(found);
            }
        }

        if let Some(found) = self
            .default_config(service)
            .and_then(|bytes| EffectiveConfig::from_layer(bytes, ConfigOrigin::Default))
        {
            return Ok(found);
        }

        Ok(EffectiveConfig::empty())
    }

    async fn lock_layer(&self, layer: &str, id: &str) -> Result<LockGuard, ResolverError> {
        let key = format!("config/{layer}/{id}");
        Ok(self
            .topology
            .locks()
            .acquire(&key, LockOptions::default())
            .await?)
    }

    /// Store a node-owned override and make the node the config source.
    pub async fn set_config_of_node(
        &self,
        node: &str,
        service: &str,
        config: Bytes,
    ) -> Result<(), ResolverError> {
        let _guard = self.lock_layer("node", node).await?;
        self.topology.update_service(node, service, |info| {
            info.node_config = Some(config);
            info.config_source = ServiceConfigSource::Node;
        })?;
        debug!(%node, %service, "node config set");
        Ok(())
    }

    /// Drop the node-owned override; the node follows its group again.
    pub async fn clear_config_of_node(&self, node: &str, service: &str) -> Result<(), ResolverError> {
        let _guard = self.lock_layer("node", node).await?;
        self.topology.update_service(node, service, |info| {
            info.node_config = None;
            info.config_source = ServiceConfigSource::NodeGroup;
        })?;
        debug!(%node, %service, "node config cleared");
        Ok(())
    }

    /// Store the group config. Members' config sources are left unchanged.
    pub async fn set_config_of_node_group(&self, group: &str, config: Bytes) -> Result<(), ResolverError> {
        let _guard = self.lock_layer("group", group).await?;
        self.topology.set_node_group_config(group, config)?;
        Ok(())
    }

    /// Store the network config of `service`. Empty bytes clear it.
    pub async fn set_config_of_network(
        &self,
        network: &str,
        service: &str,
        config: Bytes,
    ) -> Result<(), ResolverError> {
        let _guard = self.lock_layer("network", network).await?;
        self.topology.set_network_config(network, service, config)?;
        Ok(())
    }

    /// Register the fallback config of `service`.
    pub fn register_default(&self, service: &str, config: Bytes) {
        debug!(%service, len = config.len(), "default config registered");
        self.defaults.write().insert(service.into(), config);
    }

    pub fn default_config(&self, service: &str) -> Option<Bytes> {
        self.defaults.read().get(service).cloned()
    }

    /// Remember the config a successful start applied.
    pub async fn record_used_config(
        &self,
        node: &str,
        service: &str,
        config: Bytes,
    ) -> Result<(), ResolverError> {
        let _guard = self.lock_layer("used", node).await?;
        self.topology.update_service(node, service, |info| {
            info.used_config = Some(config);
        })?;
        Ok(())
    }

    /// Node-owned override of `service`, if any.
    pub fn config_of_node(&self, node: &str, service: &str) -> Result<Option<Bytes>, ResolverError> {
        let record = self.topology.get_node_by_id(node)?;
        Ok(record.service(service).and_then(|info| info.node_config.clone()))
    }

    pub fn config_of_node_group(&self, group: &str) -> Result<Bytes, ResolverError> {
        Ok(self.topology.get_node_group(group)?.config)
    }

    pub fn config_of_network(&self, network: &str, service: &str) -> Option<Bytes> {
        self.topology.network_config(network, service)
    }

    /// Config last applied by a successful start of `service` on `node`.
    pub fn used_config(&self, node: &str, service: &str) -> Result<Option<Bytes>, ResolverError> {
        let record = self.topology.get_node_by_id(node)?;
        Ok(record.service(service).and_then(|info| info.used_config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use strata_primitives::{Network, Node, NodeGroup, NodeType, ServiceInfo};

    use super::*;

    const FW: &str = "fw";

    async fn setup() -> (Arc<Topology>, ConfigResolver) {
        let topology = Arc::new(Topology::in_memory());
        topology.create_network(Network::root("root", "root")).await.unwrap();
        topology
            .create_network(Network::child_of("site", "site", "root"))
            .await
            .unwrap();
        for id in ["n1", "n2"] {
            topology
                .create_node(Node::new(id, NodeType::Firewall, "site"))
                .await
                .unwrap();
            topology
                .install_service(id, FW, ServiceInfo::installed(None))
                .unwrap();
        }
        topology
            .create_node_group(NodeGroup::new("g1", "site", FW))
            .await
            .unwrap();
        topology.add_nodes_to_group("g1", ["n1"]).await.unwrap();
        let resolver = ConfigResolver::new(topology.clone());
        (topology, resolver)
    }

    fn b(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[tokio::test]
    async fn test_precedence_chain() {
        let (_topology, resolver) = setup().await;

        assert_eq!(resolver.resolve("n1", FW).unwrap().origin, ConfigOrigin::Empty);

        resolver.register_default(FW, b("default"));
        assert_eq!(
            resolver.resolve("n1", FW).unwrap(),
            EffectiveConfig {
                bytes: b("default"),
                origin: ConfigOrigin::Default
            }
        );

        resolver.set_config_of_network("root", FW, b("root")).await.unwrap();
        assert_eq!(
            resolver.resolve("n1", FW).unwrap().origin,
            ConfigOrigin::Network("root".into())
        );
        resolver.set_config_of_network("site", FW, b("site")).await.unwrap();
        assert_eq!(resolver.resolve("n1", FW).unwrap().bytes, b("site"));

        resolver.set_config_of_node_group("g1", b("group")).await.unwrap();
        assert_eq!(
            resolver.resolve("n1", FW).unwrap().origin,
            ConfigOrigin::NodeGroup("g1".into())
        );
        // n2 is in no group
        assert_eq!(resolver.resolve("n2", FW).unwrap().bytes, b("site"));

        resolver.set_config_of_node("n1", FW, b("node")).await.unwrap();
        assert_eq!(
            resolver.resolve("n1", FW).unwrap(),
            EffectiveConfig {
                bytes: b("node"),
                origin: ConfigOrigin::Node
            }
        );
    }

    #[tokio::test]
    async fn test_node_override_survives_group_update_until_cleared() {
        let (topology, resolver) = setup().await;
        resolver.set_config_of_node_group("g1", b("group-v1")).await.unwrap();
        resolver.set_config_of_node("n1", FW, b("node")).await.unwrap();

        resolver.set_config_of_node_group("g1", b("group-v2")).await.unwrap();
        assert_eq!(resolver.resolve("n1", FW).unwrap().bytes, b("node"));
        assert_eq!(
            topology.get_node_by_id("n1").unwrap().service(FW).unwrap().config_source,
            ServiceConfigSource::Node
        );

        resolver.clear_config_of_node("n1", FW).await.unwrap();
        assert_eq!(resolver.resolve("n1", FW).unwrap().bytes, b("group-v2"));
        assert_eq!(resolver.config_of_node("n1", FW).unwrap(), None);
        assert_eq!(
            topology.get_node_by_id("n1").unwrap().service(FW).unwrap().config_source,
            ServiceConfigSource::NodeGroup
        );
    }

    #[tokio::test]
    async fn test_empty_layers_are_skipped() {
        let (_topology, resolver) = setup().await;
        resolver.register_default(FW, b("default"));
        resolver.set_config_of_node_group("g1", Bytes::new()).await.unwrap();
        resolver.set_config_of_node("n1", FW, Bytes::new()).await.unwrap();
        assert_eq!(resolver.resolve("n1", FW).unwrap().origin, ConfigOrigin::Default);
    }

    #[tokio::test]
    async fn test_record_used_config_and_errors() {
        let (_topology, resolver) = setup().await;
        resolver.record_used_config("n1", FW, b("applied")).await.unwrap();
        assert_eq!(resolver.used_config("n1", FW).unwrap(), Some(b("applied")));

        assert_matches!(
            resolver.resolve("ghost", FW),
            Err(ResolverError::Topology(TopologyError::NotFound { .. }))
        );
        assert_matches!(
            resolver.set_config_of_node("n1", "dns", b("x")).await,
            Err(ResolverError::Topology(TopologyError::NotFound { .. }))
        );
        assert_matches!(
            resolver.set_config_of_node_group("nope", b("x")).await,
            Err(ResolverError::Topology(_))
        );
    }
}
