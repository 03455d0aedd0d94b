//! Subcommand handlers. Each returns the text to print.

use std::cmp::Ordering;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Result, WrapErr, bail, eyre};
use strata_controller::ControllerConfig;
use strata_dispatch::expand_scope;
use strata_lock::LockManager;
use strata_primitives::{Link, Network, NodeGroup};
use strata_resolver::ConfigResolver;
use strata_topology::{
    FileTopologyStore, NodeFilter, Topology, TopologyPersistence, TopologySnapshot,
};
use tracing::debug;

use crate::cli::{ConfigCommand, TopologyCommand, TopologyFile, VersionCommand};

pub(crate) fn version(config: &ControllerConfig, command: VersionCommand) -> Result<String> {
    match command {
        VersionCommand::Compare { a, b } => {
            let op = match a.cmp(&b) {
                Ordering::Less => "<",
                Ordering::Equal => "==",
                Ordering::Greater => ">",
            };
            Ok(format!("{a} {op} {b}"))
        }
        VersionCommand::Check { version, service } => {
            let range = match &service {
                Some(service) => config.compatibility.range_for(service),
                None => config.compatibility.default,
            };
            range.check(&version)?;
            Ok(format!("{version} is inside {range}"))
        }
    }
}

pub(crate) async fn topology(config: &ControllerConfig, command: TopologyCommand) -> Result<String> {
    match command {
        TopologyCommand::Validate(file) => {
            let path = topology_path(config, &file)?;
            let snapshot = FileTopologyStore::new(&path)?
                .load()?
                .ok_or_else(|| eyre!("no topology stored at {}", path.display()))?;
            let counts = format!(
                "{} networks, {} groups, {} nodes, {} links",
                snapshot.networks.len(),
                snapshot.groups.len(),
                snapshot.nodes.len(),
                snapshot.links.len()
            );
            replay(snapshot).await?;
            Ok(format!("{}: ok ({counts})", path.display()))
        }
        TopologyCommand::Show(file) => {
            let topology = open_topology(config, &file)?;
            let mut out = String::new();
            for root in topology.network_tree() {
                render_network(&topology, &root, 0, &mut out)?;
            }
            Ok(out)
        }
        TopologyCommand::Expand {
            file,
            scope,
            targets,
            service,
        } => {
            let topology = open_topology(config, &file)?;
            let nodes = expand_scope(&topology, scope, &targets, &service)?;
            Ok(nodes
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n"))
        }
    }
}

pub(crate) fn config(path: &Path, config: Option<&ControllerConfig>, command: ConfigCommand) -> Result<String> {
    match command {
        ConfigCommand::Init => {
            let config = ControllerConfig::load_or_create(path)
                .wrap_err_with(|| format!("failed to initialise {}", path.display()))?;
            Ok(toml::to_string_pretty(&config)?)
        }
        ConfigCommand::Resolve {
            file,
            node,
            service,
        } => {
            let config = config.ok_or_else(|| eyre!("no configuration at {}", path.display()))?;
            let topology = Arc::new(open_topology(config, &file)?);
            let effective = ConfigResolver::new(topology).resolve(&node, &service)?;
            Ok(format!(
                "origin: {}\n{}",
                serde_json::to_string(&effective.origin)?,
                String::from_utf8_lossy(&effective.bytes)
            ))
        }
    }
}

fn topology_path(config: &ControllerConfig, file: &TopologyFile) -> Result<PathBuf> {
    file.file
        .clone()
        .or_else(|| config.storage.topology_path.clone())
        .ok_or_else(|| eyre!("no topology file given and storage.topology_path is unset"))
}

fn open_topology(config: &ControllerConfig, file: &TopologyFile) -> Result<Topology> {
    let path = topology_path(config, file)?;
    if !path.exists() {
        bail!("topology file {} does not exist", path.display());
    }
    debug!(path = %path.display(), "opening topology");
    let store = FileTopologyStore::new(&path)
        .wrap_err_with(|| format!("failed to open topology {}", path.display()))?;
    Ok(Topology::new(Arc::new(store), LockManager::new(config.lock_defaults()))?)
}

fn render_network(topology: &Topology, network: &Network, depth: usize, out: &mut String) -> Result<()> {
    let nodes = topology.list_nodes_of_network(network.id.as_str(), NodeFilter::default())?;
    let groups = topology.groups_of_network(network.id.as_str(), None);
    writeln!(
        out,
        "{:indent$}{} ({}) nodes={} groups={}",
        "",
        network.id,
        network.name,
        nodes.len(),
        groups.len(),
        indent = depth * 2
    )?;
    for child in &network.children {
        render_network(topology, child, depth + 1, out)?;
    }
    Ok(())
}

/// Rebuild `snapshot` in an empty topology through the regular create
/// operations, so every structural rule is checked again.
pub(crate) async fn replay(snapshot: TopologySnapshot) -> Result<Topology> {
    let topology = Topology::in_memory();

    // parents first
    let mut pending: Vec<Network> = snapshot.networks.values().cloned().collect();
    while !pending.is_empty() {
        let before = pending.len();
        let mut deferred = Vec::new();
        for network in pending {
            if network.is_root() || topology.network_exists(network.parent_id.as_str()) {
                let id = network.id.clone();
                topology
                    .create_network(network)
                    .await
                    .wrap_err_with(|| format!("network {id}"))?;
            } else {
                deferred.push(network);
            }
        }
        if deferred.len() == before {
            let ids: Vec<_> = deferred.iter().map(|n| n.id.to_string()).collect();
            bail!("networks without a reachable root: {}", ids.join(", "));
        }
        pending = deferred;
    }

    for group in snapshot.groups.values() {
        let empty = NodeGroup {
            node_ids: Default::default(),
            ..group.clone()
        };
        topology
            .create_node_group(empty)
            .await
            .wrap_err_with(|| format!("node group {}", group.id))?;
    }

    for node in snapshot.nodes.values() {
        topology
            .create_node(node.clone())
            .await
            .wrap_err_with(|| format!("node {}", node.id))?;
    }

    for group in snapshot.groups.values() {
        let rebuilt = topology.get_node_group(group.id.as_str())?;
        if rebuilt.node_ids != group.node_ids {
            bail!(
                "node group {} lists members that don't reference it back",
                group.id
            );
        }
    }

    for link in snapshot.links.values() {
        let id = link.id().clone();
        match link.clone() {
            Link::Network(link) => topology.add_network_link(link).await,
            Link::Node(link) => topology.add_node_link(link).await,
            Link::External(link) => topology.add_external_link(link).await,
        }
        .wrap_err_with(|| format!("link {id}"))?;
    }

    for (network, configs) in &snapshot.network_configs {
        for (service, config) in configs {
            topology
                .set_network_config(network.as_str(), service.as_str(), config.clone())
                .wrap_err_with(|| format!("config of {service} in network {network}"))?;
        }
    }

    Ok(topology)
}

#[cfg(test)]
mod tests {
    use strata_primitives::{Node, NodeType, ServiceScope};
    use strata_version::Version;

    use super::*;
    use crate::cli::TopologyFile;

    async fn sample() -> TopologySnapshot {
        let topology = Topology::in_memory();
        topology.create_network(Network::root("root", "root")).await.unwrap();
        topology
            .create_network(Network::child_of("site", "site", "root"))
            .await
            .unwrap();
        topology
            .create_node(Node::new("n1", NodeType::Firewall, "site"))
            .await
            .unwrap();
        topology
            .create_node(Node::new("n2", NodeType::Firewall, "site"))
            .await
            .unwrap();
        topology
            .create_node_group(NodeGroup::new("edge", "site", "fw"))
            .await
            .unwrap();
        topology.add_nodes_to_group("edge", ["n1", "n2"]).await.unwrap();
        topology.snapshot()
    }

    fn file_config(dir: &Path, snapshot: &TopologySnapshot) -> ControllerConfig {
        let path = dir.join("topology.json");
        std::fs::write(&path, serde_json::to_vec(snapshot).unwrap()).unwrap();
        let mut config = ControllerConfig::default();
        config.storage.topology_path = Some(path);
        config
    }

    #[tokio::test]
    async fn test_replay_accepts_consistent_snapshot() {
        let snapshot = sample().await;
        let rebuilt = replay(snapshot.clone()).await.unwrap();
        assert_eq!(rebuilt.get_node_group("edge").unwrap().node_ids, snapshot.groups["edge"].node_ids);
    }

    #[tokio::test]
    async fn test_replay_rejects_orphans() {
        let mut snapshot = sample().await;
        snapshot
            .networks
            .insert("lost".into(), Network::child_of("lost", "lost", "gone"));
        assert!(replay(snapshot).await.is_err());

        let mut snapshot = sample().await;
        snapshot.nodes.get_mut("n2").unwrap().node_groups.clear();
        assert!(replay(snapshot).await.is_err());
    }

    #[tokio::test]
    async fn test_expand_and_show() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(dir.path(), &sample().await);
        let file = TopologyFile { file: None };

        let out = topology(
            &config,
            TopologyCommand::Expand {
                file: file.clone(),
                scope: ServiceScope::NodeGroup,
                targets: vec!["edge".into()],
                service: "fw".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(out, "n1\nn2");

        let out = topology(&config, TopologyCommand::Show(file)).await.unwrap();
        assert_eq!(out, "root (root) nodes=0 groups=0\n  site (site) nodes=2 groups=1\n");
    }

    #[test]
    fn test_version_commands() {
        let config = ControllerConfig::default();
        let compare = VersionCommand::Compare {
            a: Version::parse("v1.2").unwrap(),
            b: Version::parse("v1.2.0-1").unwrap(),
        };
        assert_eq!(version(&config, compare).unwrap(), "v1.2 < v1.2.0-1");

        let check = VersionCommand::Check {
            version: Version::parse("v30.0").unwrap(),
            service: Some("fw".into()),
        };
        assert!(version(&config, check).is_err());
    }

    #[test]
    fn test_config_init_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        let out = config(&path, None, ConfigCommand::Init).unwrap();
        assert!(path.exists());
        assert_eq!(toml::from_str::<ControllerConfig>(&out).unwrap(), ControllerConfig::default());
    }
}
