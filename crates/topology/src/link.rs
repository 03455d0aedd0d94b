use strata_primitives::{ExternalLink, Link, LinkId, NetworkLink, NodeLink};
use tracing::debug;

use crate::error::{RecordKind, TopologyError};
use crate::store::TopologySnapshot;
use crate::{Topology, network_lock_key};

fn link_lock_key(id: &str) -> String {
    format!("link/{id}")
}

fn insert_link(data: &mut TopologySnapshot, link: Link) -> Result<Link, TopologyError> {
    let id = link.id().clone();
    if id.is_empty() {
        return Err(TopologyError::invalid("link id must not be empty"));
    }
    if data.links.contains_key(&id) {
        return Err(TopologyError::exists(RecordKind::Link, &id));
    }
    debug!(link = %id, "link added");
    data.links.insert(id, link.clone());
    Ok(link)
}

impl Topology {
    /// Link two networks.
    pub async fn add_network_link(&self, link: NetworkLink) -> Result<Link, TopologyError> {
        let keys = vec![
            network_lock_key(link.from.network_id.as_str()),
            network_lock_key(link.to.network_id.as_str()),
            link_lock_key(link.id.as_str()),
        ];
        self.mutate(keys, move |data| {
            for end in [&link.from.network_id, &link.to.network_id] {
                if !data.networks.contains_key(end) {
                    return Err(TopologyError::not_found(RecordKind::Network, end));
                }
            }
            insert_link(data, Link::Network(link))
        })
        .await
    }

    /// Link two local nodes.
    pub async fn add_node_link(&self, link: NodeLink) -> Result<Link, TopologyError> {
        let keys = vec![link_lock_key(link.id.as_str())];
        self.mutate(keys, move |data| {
            for end in [&link.from.node_id, &link.to.node_id] {
                if !data.nodes.contains_key(end) {
                    return Err(TopologyError::not_found(RecordKind::Node, end));
                }
            }
            insert_link(data, Link::Node(link))
        })
        .await
    }

    /// Link a local node to a node outside the topology.
    pub async fn add_external_link(&self, link: ExternalLink) -> Result<Link, TopologyError> {
        let keys = vec![link_lock_key(link.id.as_str())];
        self.mutate(keys, move |data| {
            if !data.nodes.contains_key(&link.from.node_id) {
                return Err(TopologyError::not_found(RecordKind::Node, &link.from.node_id));
            }
            insert_link(data, Link::External(link))
        })
        .await
    }

    /// Links with a local endpoint on `node`.
    pub fn links_of_node(&self, node: &str) -> Vec<Link> {
        self.read(|data| {
            data.links
                .values()
                .filter(|l| l.touches_node(node))
                .cloned()
                .collect()
        })
    }

    /// Network links with an endpoint on `network`.
    pub fn links_of_network(&self, network: &str) -> Vec<Link> {
        self.read(|data| {
            data.links
                .values()
                .filter(|l| l.touches_network(network))
                .cloned()
                .collect()
        })
    }

    pub async fn remove_link(&self, id: &str) -> Result<Link, TopologyError> {
        self.mutate(vec![link_lock_key(id)], |data| {
            data.links
                .remove(&LinkId::from(id))
                .ok_or_else(|| TopologyError::not_found(RecordKind::Link, id))
        })
        .await
    }
}
