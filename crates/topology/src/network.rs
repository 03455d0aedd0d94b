use std::collections::{BTreeMap, VecDeque};

use bytes::Bytes;
use strata_primitives::{LocationTier, Network, NetworkId};
use tracing::{debug, info};

use crate::error::{RecordKind, TopologyError};
use crate::store::TopologySnapshot;
use crate::{Topology, network_lock_key};

fn validate_tiers(network: &Network, parent: Option<&Network>) -> Result<(), TopologyError> {
    if !LocationTier::is_ordered(&network.tiers) {
        return Err(TopologyError::invalid(format!(
            "tiers of network {} are not strictly ordered",
            network.id
        )));
    }
    if let Some(location_tier) = network.location.as_ref().and_then(|l| l.tier) {
        if !network.tiers.is_empty() && !network.tiers.contains(&location_tier) {
            return Err(TopologyError::invalid(format!(
                "location tier {location_tier} is not one of the tiers of network {}",
                network.id
            )));
        }
    }
    if let (Some(parent_last), Some(first)) =
        (parent.and_then(Network::last_tier), network.first_tier())
    {
        if first <= parent_last {
            return Err(TopologyError::invalid(format!(
                "first tier {first} of network {} does not follow parent tier {parent_last}",
                network.id
            )));
        }
    }
    Ok(())
}

/// Finest tier declared on the path from `id` to the root.
fn inherited_last_tier(data: &TopologySnapshot, id: &NetworkId) -> Option<LocationTier> {
    let mut current = data.networks.get(id);
    while let Some(network) = current {
        if let Some(tier) = network.last_tier() {
            return Some(tier);
        }
        if network.is_root() {
            return None;
        }
        current = data.networks.get(&network.parent_id);
    }
    None
}

pub(crate) fn descendants(data: &TopologySnapshot, id: &NetworkId) -> Vec<NetworkId> {
    let mut children: BTreeMap<&NetworkId, Vec<&NetworkId>> = BTreeMap::new();
    for network in data.networks.values() {
        if !network.is_root() {
            children.entry(&network.parent_id).or_default().push(&network.id);
        }
    }

    let mut out = Vec::new();
    let mut queue: VecDeque<&NetworkId> = VecDeque::from([id]);
    while let Some(next) = queue.pop_front() {
        for child in children.get(next).into_iter().flatten() {
            out.push((*child).clone());
            queue.push_back(*child);
        }
    }
    out
}

fn build_tree(data: &TopologySnapshot, id: &NetworkId) -> Option<Network> {
    let mut network = data.networks.get(id)?.clone();
    network.children = data
        .networks
        .values()
        .filter(|n| !n.is_root() && n.parent_id == network.id)
        .filter_map(|n| build_tree(data, &n.id))
        .collect();
    Some(network)
}

impl Topology {
    /// Create a network. Roots have an empty `parent_id`.
    ///
    /// Tiers must be strictly ordered and the first tier must follow the
    /// finest tier declared by the ancestors.
    pub async fn create_network(&self, mut network: Network) -> Result<Network, TopologyError> {
        if network.id.is_empty() {
            return Err(TopologyError::invalid("network id must not be empty"));
        }
        network.children.clear();

        let mut keys = vec![network_lock_key(network.id.as_str())];
        if !network.is_root() {
            keys.push(network_lock_key(network.parent_id.as_str()));
        }

        self.mutate(keys, move |data| {
            if data.networks.contains_key(&network.id) {
                return Err(TopologyError::exists(RecordKind::Network, &network.id));
            }
            if !network.is_root() {
                if network.parent_id == network.id {
                    return Err(TopologyError::invalid(format!(
                        "network {} cannot be its own parent",
                        network.id
                    )));
                }
                if !data.networks.contains_key(&network.parent_id) {
                    return Err(TopologyError::not_found(RecordKind::Network, &network.parent_id));
                }
            }

            let parent_tier = inherited_last_tier(data, &network.parent_id);
            let parent = parent_tier.map(|tier| Network {
                tiers: vec![tier],
                ..Default::default()
            });
            validate_tiers(&network, parent.as_ref())?;

            info!(network = %network.id, parent = %network.parent_id, "network created");
            data.networks.insert(network.id.clone(), network.clone());
            Ok(network)
        })
        .await
    }

    pub fn get_network(&self, id: &str) -> Result<Network, TopologyError> {
        self.read(|data| data.networks.get(id).cloned())
            .ok_or_else(|| TopologyError::not_found(RecordKind::Network, id))
    }

    pub fn network_exists(&self, id: &str) -> bool {
        self.read(|data| data.networks.contains_key(id))
    }

    /// All root networks with `children` materialised.
    pub fn network_tree(&self) -> Vec<Network> {
        self.read(|data| {
            data.networks
                .values()
                .filter(|n| n.is_root())
                .filter_map(|n| build_tree(data, &n.id))
                .collect()
        })
    }

    /// The network `id` with its subtree materialised.
    pub fn subtree(&self, id: &str) -> Result<Network, TopologyError> {
        self.read(|data| build_tree(data, &NetworkId::from(id)))
            .ok_or_else(|| TopologyError::not_found(RecordKind::Network, id))
    }

    /// Every network below `id`, breadth first, excluding `id` itself.
    pub fn descendant_networks(&self, id: &str) -> Result<Vec<NetworkId>, TopologyError> {
        self.read(|data| {
            let id = NetworkId::from(id);
            if !data.networks.contains_key(&id) {
                return Err(TopologyError::not_found(RecordKind::Network, &id));
            }
            Ok(descendants(data, &id))
        })
    }

    /// `id` followed by its ancestors up to the root.
    pub fn network_path_to_root(&self, id: &str) -> Result<Vec<NetworkId>, TopologyError> {
        self.read(|data| {
            let mut path = Vec::new();
            let mut current = data
                .networks
                .get(id)
                .ok_or_else(|| TopologyError::not_found(RecordKind::Network, id))?;
            loop {
                path.push(current.id.clone());
                if current.is_root() || path.len() > data.networks.len() {
                    break;
                }
                current = data
                    .networks
                    .get(&current.parent_id)
                    .ok_or_else(|| TopologyError::not_found(RecordKind::Network, &current.parent_id))?;
            }
            Ok(path)
        })
    }

    /// Delete a network with no children, nodes or node groups.
    ///
    /// Network links touching it and its configuration layer are removed.
    pub async fn delete_network(&self, id: &str) -> Result<(), TopologyError> {
        let network = self.get_network(id)?;
        let mut keys = vec![network_lock_key(id)];
        if !network.is_root() {
            keys.push(network_lock_key(network.parent_id.as_str()));
        }

        self.mutate(keys, |data| {
            let id = NetworkId::from(id);
            if !data.networks.contains_key(&id) {
                return Err(TopologyError::not_found(RecordKind::Network, &id));
            }
            if data.networks.values().any(|n| !n.is_root() && n.parent_id == id) {
                return Err(TopologyError::invalid(format!("network {id} has child networks")));
            }
            if data.nodes.values().any(|n| n.network_id == id) {
                return Err(TopologyError::invalid(format!("network {id} has nodes")));
            }
            if data.groups.values().any(|g| g.network_id == id) {
                return Err(TopologyError::invalid(format!("network {id} has node groups")));
            }

            data.networks.remove(&id);
            data.network_configs.remove(&id);
            data.links.retain(|_, link| !link.touches_network(id.as_str()));
            info!(network = %id, "network deleted");
            Ok(())
        })
        .await
    }

    /// Network-level configuration of `service`, if set.
    pub fn network_config(&self, network: &str, service: &str) -> Option<Bytes> {
        self.read(|data| {
            data.network_configs
                .get(network)
                .and_then(|configs| configs.get(service))
                .cloned()
        })
    }

    /// Store the network-level configuration of `service`. Empty bytes clear it.
    pub fn set_network_config(
        &self,
        network: &str,
        service: &str,
        config: Bytes,
    ) -> Result<(), TopologyError> {
        self.update_in_place(|data| {
            let network = NetworkId::from(network);
            if !data.networks.contains_key(&network) {
                return Err(TopologyError::not_found(RecordKind::Network, &network));
            }
            let configs = data.network_configs.entry(network.clone()).or_default();
            if config.is_empty() {
                configs.remove(service);
            } else {
                configs.insert(service.into(), config);
            }
            if configs.is_empty() {
                data.network_configs.remove(&network);
            }
            debug!(%network, %service, "network config updated");
            Ok(())
        })
    }
}
