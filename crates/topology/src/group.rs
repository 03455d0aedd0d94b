use bytes::Bytes;
use strata_primitives::{GroupId, NodeGroup, NodeId};
use tracing::{debug, info};

use crate::error::{RecordKind, TopologyError};
use crate::store::TopologySnapshot;
use crate::{Topology, group_lock_key, network_lock_key};

/// Check that `node` may join `group`: same network, no other group of the
/// same service.
fn check_membership(
    data: &TopologySnapshot,
    group: &NodeGroup,
    node: &NodeId,
    allow_move: bool,
) -> Result<(), TopologyError> {
    let record = data
        .nodes
        .get(node)
        .ok_or_else(|| TopologyError::not_found(RecordKind::Node, node))?;
    if record.network_id != group.network_id {
        return Err(TopologyError::invalid(format!(
            "node {node} is in network {}, group {} is in network {}",
            record.network_id, group.id, group.network_id
        )));
    }
    match record.node_group_id(group.service.as_str()) {
        Some(current) if *current != group.id && !allow_move => Err(TopologyError::invalid(format!(
            "node {node} already belongs to group {current} for service {}",
            group.service
        ))),
        _ => Ok(()),
    }
}

enum MoveAttempt {
    Moved(Option<GroupId>),
    Stale,
}

fn group_mut<'a>(data: &'a mut TopologySnapshot, id: &str) -> Result<&'a mut NodeGroup, TopologyError> {
    data.groups
        .get_mut(id)
        .ok_or_else(|| TopologyError::not_found(RecordKind::NodeGroup, id))
}

impl Topology {
    /// Create a node group of one service in one network.
    pub async fn create_node_group(&self, group: NodeGroup) -> Result<NodeGroup, TopologyError> {
        if group.id.is_empty() || group.service.is_empty() {
            return Err(TopologyError::invalid("node group id and service must not be empty"));
        }
        let keys = vec![
            network_lock_key(group.network_id.as_str()),
            group_lock_key(group.id.as_str()),
        ];

        self.mutate(keys, move |data| {
            if data.groups.contains_key(&group.id) {
                return Err(TopologyError::exists(RecordKind::NodeGroup, &group.id));
            }
            if !data.networks.contains_key(&group.network_id) {
                return Err(TopologyError::not_found(RecordKind::Network, &group.network_id));
            }
            for node in &group.node_ids {
                check_membership(data, &group, node, false)?;
            }

            for node in &group.node_ids {
                if let Some(record) = data.nodes.get_mut(node) {
                    record
                        .node_groups
                        .insert(group.service.clone(), group.id.clone());
                }
            }
            info!(group = %group.id, network = %group.network_id, service = %group.service, "node group created");
            data.groups.insert(group.id.clone(), group.clone());
            Ok(group)
        })
        .await
    }

    pub fn get_node_group(&self, id: &str) -> Result<NodeGroup, TopologyError> {
        self.read(|data| data.groups.get(id).cloned())
            .ok_or_else(|| TopologyError::not_found(RecordKind::NodeGroup, id))
    }

    /// Groups of a network, optionally only those of `service`.
    pub fn groups_of_network(&self, network: &str, service: Option<&str>) -> Vec<NodeGroup> {
        self.read(|data| {
            data.groups
                .values()
                .filter(|g| g.network_id == network)
                .filter(|g| service.is_none_or(|s| g.service == s))
                .cloned()
                .collect()
        })
    }

    /// Add nodes to a group. Nodes already members are left as they are.
    pub async fn add_nodes_to_group<I, N>(&self, group: &str, nodes: I) -> Result<(), TopologyError>
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        let nodes: Vec<NodeId> = nodes.into_iter().map(Into::into).collect();
        self.mutate(vec![group_lock_key(group)], |data| {
            let target = data
                .groups
                .get(group)
                .cloned()
                .ok_or_else(|| TopologyError::not_found(RecordKind::NodeGroup, group))?;
            for node in &nodes {
                check_membership(data, &target, node, false)?;
            }

            for node in &nodes {
                if let Some(record) = data.nodes.get_mut(node) {
                    record
                        .node_groups
                        .insert(target.service.clone(), target.id.clone());
                }
            }
            group_mut(data, group)?.node_ids.extend(nodes.iter().cloned());
            debug!(%group, count = nodes.len(), "nodes added to group");
            Ok(())
        })
        .await
    }

    /// Remove nodes from a group. Unknown node ids fail the call; nodes that
    /// are not members are skipped.
    pub async fn remove_nodes_from_group<I, N>(&self, group: &str, nodes: I) -> Result<(), TopologyError>
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        let nodes: Vec<NodeId> = nodes.into_iter().map(Into::into).collect();
        self.mutate(vec![group_lock_key(group)], |data| {
            let service = data
                .groups
                .get(group)
                .map(|g| g.service.clone())
                .ok_or_else(|| TopologyError::not_found(RecordKind::NodeGroup, group))?;
            if let Some(missing) = nodes.iter().find(|n| !data.nodes.contains_key(*n)) {
                return Err(TopologyError::not_found(RecordKind::Node, missing));
            }

            let target = group_mut(data, group)?;
            let removed: Vec<NodeId> = nodes
                .iter()
                .filter(|n| target.node_ids.remove(*n))
                .cloned()
                .collect();
            for node in &removed {
                if let Some(record) = data.nodes.get_mut(node) {
                    record.node_groups.remove(&service);
                }
            }
            debug!(%group, count = removed.len(), "nodes removed from group");
            Ok(())
        })
        .await
    }

    /// Move a node into `to_group`, leaving whichever group of the same
    /// service it was in. Both groups are locked and the change is applied in
    /// one write, so the node is never observed in two groups or none.
    ///
    /// Returns the group the node left, if any.
    pub async fn move_node_to_group(&self, node: &str, to_group: &str) -> Result<Option<GroupId>, TopologyError> {
        loop {
            let target = self.get_node_group(to_group)?;
            let from = self
                .get_node_by_id(node)?
                .node_group_id(target.service.as_str())
                .cloned();

            let mut keys = vec![group_lock_key(to_group)];
            if let Some(from) = &from {
                keys.push(group_lock_key(from.as_str()));
            }

            let attempt = self
                .mutate(keys, |data| {
                    let target = data
                        .groups
                        .get(to_group)
                        .cloned()
                        .ok_or_else(|| TopologyError::not_found(RecordKind::NodeGroup, to_group))?;
                    let node_id = NodeId::from(node);
                    check_membership(data, &target, &node_id, true)?;

                    let current = data
                        .nodes
                        .get(node)
                        .and_then(|n| n.node_group_id(target.service.as_str()))
                        .cloned();
                    if current != from {
                        // Moved by someone else before we held its group lock.
                        return Ok(MoveAttempt::Stale);
                    }

                    if let Some(previous) = &current {
                        if let Some(group) = data.groups.get_mut(previous) {
                            group.node_ids.remove(node);
                        }
                    }
                    group_mut(data, to_group)?.node_ids.insert(node_id);
                    if let Some(record) = data.nodes.get_mut(node) {
                        record.node_groups.insert(target.service.clone(), target.id.clone());
                    }
                    info!(%node, from = ?current, to = %to_group, "node moved");
                    Ok(MoveAttempt::Moved(current))
                })
                .await?;

            match attempt {
                MoveAttempt::Moved(previous) => return Ok(previous),
                MoveAttempt::Stale => debug!(%node, "group changed while waiting for locks, retrying move"),
            }
        }
    }

    /// Delete a group. Members stay in the topology without a group for the
    /// group's service.
    pub async fn delete_node_group(&self, id: &str) -> Result<NodeGroup, TopologyError> {
        let group = self.get_node_group(id)?;
        let keys = vec![network_lock_key(group.network_id.as_str()), group_lock_key(id)];

        self.mutate(keys, |data| {
            let group = data
                .groups
                .remove(id)
                .ok_or_else(|| TopologyError::not_found(RecordKind::NodeGroup, id))?;
            for node in &group.node_ids {
                if let Some(record) = data.nodes.get_mut(node) {
                    record.node_groups.remove(&group.service);
                }
            }
            info!(group = %id, "node group deleted");
            Ok(group)
        })
        .await
    }

    /// Store the group-level service configuration.
    pub fn set_node_group_config(&self, id: &str, config: Bytes) -> Result<(), TopologyError> {
        self.update_in_place(|data| {
            group_mut(data, id)?.config = config;
            debug!(group = %id, "node group config updated");
            Ok(())
        })
    }

    /// Replace the description and metadata of a group.
    pub fn update_node_group_details(
        &self,
        id: &str,
        description: Option<String>,
        metadata: Option<String>,
    ) -> Result<(), TopologyError> {
        self.update_in_place(|data| {
            let group = group_mut(data, id)?;
            if let Some(description) = description {
                group.description = description;
            }
            if let Some(metadata) = metadata {
                group.metadata = metadata;
            }
            Ok(())
        })
    }
}
