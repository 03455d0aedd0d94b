use std::collections::BTreeSet;

use strata_primitives::{
    Node, NodeId, NodeState, Pagination, ServiceInfo, ServiceState, unix_seconds,
};
use tracing::{debug, info};

use crate::error::{RecordKind, TopologyError};
use crate::network::descendants;
use crate::store::TopologySnapshot;
use crate::{Topology, group_lock_key, network_lock_key};

/// Filter for [`Topology::list_nodes_of_network`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFilter {
    /// Include nodes of every descendant network.
    pub with_subnetworks: bool,
    /// Only nodes in this state.
    pub state: Option<NodeState>,
    pub page: Pagination,
}

impl NodeFilter {
    pub fn with_subnetworks(mut self) -> Self {
        self.with_subnetworks = true;
        self
    }

    pub fn in_state(mut self, state: NodeState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn paged(mut self, page: Pagination) -> Self {
        self.page = page;
        self
    }
}

fn node_mut<'a>(data: &'a mut TopologySnapshot, id: &str) -> Result<&'a mut Node, TopologyError> {
    data.nodes
        .get_mut(id)
        .ok_or_else(|| TopologyError::not_found(RecordKind::Node, id))
}

impl Topology {
    /// Add a node to an existing network.
    ///
    /// The node starts `Unregistered`. Group memberships listed in
    /// `node_groups` are validated and applied to the groups.
    pub async fn create_node(&self, mut node: Node) -> Result<Node, TopologyError> {
        if node.id.is_empty() {
            return Err(TopologyError::invalid("node id must not be empty"));
        }
        node.node_state = NodeState::Unregistered;
        if node.registered_at == 0 {
            node.registered_at = unix_seconds();
        }

        let mut keys = vec![network_lock_key(node.network_id.as_str())];
        keys.extend(node.node_groups.values().map(|g| group_lock_key(g.as_str())));

        self.mutate(keys, move |data| {
            if data.nodes.contains_key(&node.id) {
                return Err(TopologyError::exists(RecordKind::Node, &node.id));
            }
            if !data.networks.contains_key(&node.network_id) {
                return Err(TopologyError::not_found(RecordKind::Network, &node.network_id));
            }
            for (service, group_id) in &node.node_groups {
                let group = data
                    .groups
                    .get(group_id)
                    .ok_or_else(|| TopologyError::not_found(RecordKind::NodeGroup, group_id))?;
                if group.service != *service || group.network_id != node.network_id {
                    return Err(TopologyError::invalid(format!(
                        "node {} cannot join group {group_id} of service {} in network {}",
                        node.id, group.service, group.network_id
                    )));
                }
            }

            for group_id in node.node_groups.values() {
                if let Some(group) = data.groups.get_mut(group_id) {
                    group.node_ids.insert(node.id.clone());
                }
            }
            info!(node = %node.id, network = %node.network_id, "node created");
            data.nodes.insert(node.id.clone(), node.clone());
            Ok(node)
        })
        .await
    }

    pub fn get_node_by_id(&self, id: &str) -> Result<Node, TopologyError> {
        self.read(|data| data.nodes.get(id).cloned())
            .ok_or_else(|| TopologyError::not_found(RecordKind::Node, id))
    }

    pub fn node_exists(&self, id: &str) -> bool {
        self.read(|data| data.nodes.contains_key(id))
    }

    /// Ids of every node, sorted.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.read(|data| data.nodes.keys().cloned().collect())
    }

    /// Remove a node, its group memberships and every link touching it.
    pub async fn delete_node(&self, id: &str) -> Result<Node, TopologyError> {
        let node = self.get_node_by_id(id)?;
        let mut keys = vec![network_lock_key(node.network_id.as_str())];
        keys.extend(node.node_groups.values().map(|g| group_lock_key(g.as_str())));

        self.mutate(keys, |data| {
            let node = data
                .nodes
                .remove(id)
                .ok_or_else(|| TopologyError::not_found(RecordKind::Node, id))?;
            for group in data.groups.values_mut() {
                group.node_ids.remove(id);
            }
            data.links.retain(|_, link| !link.touches_node(id));
            info!(node = %id, "node deleted");
            Ok(node)
        })
        .await
    }

    /// Nodes of `network_id`, sorted by id, filtered and paginated.
    pub fn list_nodes_of_network(
        &self,
        network_id: &str,
        filter: NodeFilter,
    ) -> Result<Vec<Node>, TopologyError> {
        self.read(|data| {
            let root = strata_primitives::NetworkId::from(network_id);
            if !data.networks.contains_key(&root) {
                return Err(TopologyError::not_found(RecordKind::Network, &root));
            }
            let mut networks = BTreeSet::from([root.clone()]);
            if filter.with_subnetworks {
                networks.extend(descendants(data, &root));
            }

            let nodes = data
                .nodes
                .values()
                .filter(|n| networks.contains(&n.network_id))
                .filter(|n| filter.state.is_none_or(|s| n.node_state == s))
                .cloned()
                .collect();
            Ok(filter.page.apply(nodes))
        })
    }

    /// Install `service` on a node with the given view.
    pub fn install_service(
        &self,
        node: &str,
        service: &str,
        info: ServiceInfo,
    ) -> Result<(), TopologyError> {
        self.update_in_place(|data| {
            let node = node_mut(data, node)?;
            if node.services.contains_key(service) {
                return Err(TopologyError::exists(
                    RecordKind::Service,
                    format!("{}/{service}", node.id),
                ));
            }
            debug!(node = %node.id, %service, "service installed");
            node.services.insert(service.into(), info);
            Ok(())
        })
    }

    /// Remove `service` from a node, including its group membership for that service.
    pub async fn uninstall_service(&self, node: &str, service: &str) -> Result<ServiceInfo, TopologyError> {
        let record = self.get_node_by_id(node)?;
        let keys = record
            .node_group_id(service)
            .map(|g| vec![group_lock_key(g.as_str())])
            .unwrap_or_default();

        self.mutate(keys, |data| {
            let record = node_mut(data, node)?;
            let info = record.services.remove(service).ok_or_else(|| {
                TopologyError::not_found(RecordKind::Service, format!("{node}/{service}"))
            })?;
            let group = record.node_groups.remove(service);
            if let Some(group) = group.and_then(|g| data.groups.get_mut(&g)) {
                group.node_ids.remove(node);
            }
            debug!(%node, %service, "service uninstalled");
            Ok(info)
        })
        .await
    }

    /// Apply `update` to the view of `service` on `node`.
    pub fn update_service<R>(
        &self,
        node: &str,
        service: &str,
        update: impl FnOnce(&mut ServiceInfo) -> R,
    ) -> Result<R, TopologyError> {
        self.update_in_place(|data| {
            let record = node_mut(data, node)?;
            let info = record.services.get_mut(service).ok_or_else(|| {
                TopologyError::not_found(RecordKind::Service, format!("{node}/{service}"))
            })?;
            Ok(update(info))
        })
    }

    /// Record the node state decided by the state tracker.
    pub fn set_node_state(&self, node: &str, state: NodeState) -> Result<(), TopologyError> {
        self.update_in_place(|data| {
            node_mut(data, node)?.node_state = state;
            Ok(())
        })
    }

    /// Record the service state decided by the state tracker.
    pub fn set_service_state(
        &self,
        node: &str,
        service: &str,
        state: ServiceState,
    ) -> Result<(), TopologyError> {
        self.update_service(node, service, |info| info.service_state = state)
    }

    /// Replace the description and metadata of a node.
    pub fn update_node_details(
        &self,
        node: &str,
        description: Option<String>,
        metadata: Option<String>,
    ) -> Result<(), TopologyError> {
        self.update_in_place(|data| {
            let node = node_mut(data, node)?;
            if let Some(description) = description {
                node.description = description;
            }
            if let Some(metadata) = metadata {
                node.metadata = metadata;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use strata_primitives::{NodeGroup, NodeType};

    use super::*;
    use crate::test_utils::{add_node, sample};

    #[tokio::test]
    async fn test_create_and_delete_node() {
        let topology = sample().await;
        let node = add_node(&topology, "n1", "east").await;
        assert_eq!(node.node_state, NodeState::Unregistered);
        assert!(node.registered_at > 0);

        assert_matches!(
            topology
                .create_node(Node::new("n1", NodeType::Switch, "east"))
                .await,
            Err(TopologyError::AlreadyExists { kind: RecordKind::Node, .. })
        );
        assert_matches!(
            topology
                .create_node(Node::new("n2", NodeType::Switch, "mars"))
                .await,
            Err(TopologyError::NotFound { kind: RecordKind::Network, .. })
        );

        topology.delete_node("n1").await.unwrap();
        assert!(!topology.node_exists("n1"));
        assert_matches!(topology.delete_node("n1").await, Err(TopologyError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_create_node_with_group() {
        let topology = sample().await;
        topology
            .create_node_group(NodeGroup::new("g1", "east", "fw"))
            .await
            .unwrap();

        let mut node = Node::new("n1", NodeType::Firewall, "east");
        node.node_groups.insert("fw".into(), "g1".into());
        topology.create_node(node).await.unwrap();
        assert!(topology.get_node_group("g1").unwrap().contains("n1"));

        let mut stray = Node::new("n2", NodeType::Firewall, "west");
        stray.node_groups.insert("fw".into(), "g1".into());
        assert_matches!(
            topology.create_node(stray).await,
            Err(TopologyError::InvalidTopology(_))
        );

        topology.delete_node("n1").await.unwrap();
        assert!(topology.get_node_group("g1").unwrap().node_ids.is_empty());
    }

    #[tokio::test]
    async fn test_list_nodes_of_network() {
        let topology = sample().await;
        for (id, net) in [("a", "root"), ("b", "east"), ("c", "east-dc"), ("d", "west")] {
            add_node(&topology, id, net).await;
        }
        topology.set_node_state("c", NodeState::Online).unwrap();

        let ids = |nodes: Vec<Node>| nodes.into_iter().map(|n| n.id).collect::<Vec<_>>();

        assert_eq!(
            ids(topology.list_nodes_of_network("east", NodeFilter::default()).unwrap()),
            ["b"]
        );
        assert_eq!(
            ids(topology
                .list_nodes_of_network("east", NodeFilter::default().with_subnetworks())
                .unwrap()),
            ["b", "c"]
        );
        assert_eq!(
            ids(topology
                .list_nodes_of_network(
                    "root",
                    NodeFilter::default().with_subnetworks().in_state(NodeState::Online)
                )
                .unwrap()),
            ["c"]
        );
        assert_eq!(
            ids(topology
                .list_nodes_of_network(
                    "root",
                    NodeFilter::default()
                        .with_subnetworks()
                        .paged(Pagination::from_raw(1, 2).unwrap())
                )
                .unwrap()),
            ["c", "d"]
        );
        assert_matches!(
            topology.list_nodes_of_network("nope", NodeFilter::default()),
            Err(TopologyError::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_service_install_and_state() {
        let topology = sample().await;
        add_node(&topology, "n1", "east").await;

        topology
            .install_service("n1", "fw", ServiceInfo::installed(Some("v1.0".into())))
            .unwrap();
        assert_matches!(
            topology.install_service("n1", "fw", ServiceInfo::default()),
            Err(TopologyError::AlreadyExists { kind: RecordKind::Service, .. })
        );

        topology
            .set_service_state("n1", "fw", ServiceState::Running)
            .unwrap();
        assert_eq!(
            topology.get_node_by_id("n1").unwrap().service_state("fw"),
            ServiceState::Running
        );
        assert_matches!(
            topology.set_service_state("n1", "dns", ServiceState::Running),
            Err(TopologyError::NotFound { kind: RecordKind::Service, .. })
        );

        topology
            .create_node_group(NodeGroup::new("g1", "east", "fw"))
            .await
            .unwrap();
        topology.add_nodes_to_group("g1", ["n1"]).await.unwrap();
        let removed = topology.uninstall_service("n1", "fw").await.unwrap();
        assert_eq!(removed.service_state, ServiceState::Running);
        assert!(topology.get_node_group("g1").unwrap().node_ids.is_empty());
        assert!(topology.get_node_by_id("n1").unwrap().node_group_id("fw").is_none());
    }
}
