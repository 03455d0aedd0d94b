//! Scope expansion.

use std::collections::HashSet;

use strata_primitives::{NodeId, ServiceScope};
use strata_topology::{NodeFilter, RecordKind, Topology};

use crate::error::DispatchError;

/// Nodes addressed by `targets` under `scope`, in target order, without
/// duplicates. Fails on the first unknown target.
pub fn expand_scope(
    topology: &Topology,
    scope: ServiceScope,
    targets: &[String],
    service: &str,
) -> Result<Vec<NodeId>, DispatchError> {
    let mut seen = HashSet::new();
    let mut nodes = Vec::new();
    let mut push = |id: NodeId| {
        if seen.insert(id.clone()) {
            nodes.push(id);
        }
    };

    for target in targets {
        match scope {
            ServiceScope::Node => {
                if !topology.node_exists(target) {
                    return Err(DispatchError::NotFound {
                        kind: RecordKind::Node,
                        id: target.clone(),
                    });
                }
                push(target.as_str().into());
            }
            ServiceScope::NodeGroup => {
                let group = topology.get_node_group(target)?;
                if group.service != service {
                    return Err(DispatchError::ServiceMismatch {
                        group: target.clone(),
                        service: service.to_owned(),
                    });
                }
                group.node_ids.into_iter().for_each(&mut push);
            }
            ServiceScope::Network => {
                topology
                    .list_nodes_of_network(target, NodeFilter::default())?
                    .into_iter()
                    .for_each(|node| push(node.id));
            }
            ServiceScope::NetworkWithSubnetworks => {
                topology
                    .list_nodes_of_network(target, NodeFilter::default().with_subnetworks())?
                    .into_iter()
                    .for_each(|node| push(node.id));
            }
        }
    }
    Ok(nodes)
}
