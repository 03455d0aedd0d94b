use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use strata_primitives::{NodeId, NodeState, NodeStateChange, ServiceName, ServiceState, unix_millis};
use strata_topology::Topology;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StateError;
use crate::events::{StateChangeEmitter, StateChangeStream};
use crate::metrics::StateMetrics;

/// Heartbeat liveness settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// A node silent for longer than this is considered offline.
    pub window: Duration,
    /// Period of the liveness monitor.
    pub sweep_interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
struct NodeStatus {
    node_state: NodeState,
    services: BTreeMap<ServiceName, ServiceState>,
    last_heartbeat: Option<Instant>,
    /// Whether the current consumer has seen this node's snapshot.
    replayed: bool,
}

impl NodeStatus {
    fn node_items(&self, node: &NodeId, snapshot: bool) -> Vec<NodeStateChange> {
        let timestamp_ms = unix_millis();
        if self.services.is_empty() {
            return vec![NodeStateChange {
                timestamp_ms,
                node_id: node.clone(),
                node_state: self.node_state,
                service: None,
                service_state: None,
                snapshot,
            }];
        }
        self.services
            .iter()
            .map(|(service, state)| NodeStateChange {
                timestamp_ms,
                node_id: node.clone(),
                node_state: self.node_state,
                service: Some(service.clone()),
                service_state: Some(*state),
                snapshot,
            })
            .collect()
    }

    fn service_item(&self, node: &NodeId, service: &ServiceName, state: ServiceState) -> NodeStateChange {
        NodeStateChange {
            timestamp_ms: unix_millis(),
            node_id: node.clone(),
            node_state: self.node_state,
            service: Some(service.clone()),
            service_state: Some(state),
            snapshot: false,
        }
    }

    fn heartbeat_fresh(&self, now: Instant, window: Duration) -> bool {
        self.last_heartbeat
            .is_some_and(|at| now.saturating_duration_since(at) <= window)
    }
}

type NodeEntry = Arc<Mutex<NodeStatus>>;

/// Authoritative node and service state.
///
/// Every write for one node happens under that node's mutex and is mirrored
/// into the topology record before the change is published, so the stream
/// preserves per-node order. Different nodes never contend.
#[derive(Debug)]
pub struct StateTracker {
    topology: Arc<Topology>,
    nodes: RwLock<HashMap<NodeId, NodeEntry>>,
    emitter: StateChangeEmitter,
    config: LivenessConfig,
    metrics: StateMetrics,
}

impl StateTracker {
    /// Create a tracker seeded from the node records of `topology`.
    ///
    /// Nodes recorded as online get a fresh heartbeat so they time out
    /// normally if they stay silent.
    pub fn new(topology: Arc<Topology>, config: LivenessConfig) -> Self {
        let now = Instant::now();
        let nodes = topology
            .snapshot()
            .nodes
            .into_values()
            .map(|node| {
                let status = NodeStatus {
                    node_state: node.node_state,
                    services: node
                        .services
                        .into_iter()
                        .map(|(service, info)| (service, info.service_state))
                        .collect(),
                    last_heartbeat: (node.node_state == NodeState::Online).then_some(now),
                    replayed: false,
                };
                (node.id, Arc::new(Mutex::new(status)))
            })
            .collect();

        Self {
            topology,
            nodes: RwLock::new(nodes),
            emitter: StateChangeEmitter::default(),
            config,
            metrics: StateMetrics,
        }
    }

    pub fn config(&self) -> LivenessConfig {
        self.config
    }

    /// Entry of `node`, loaded from the topology on first use.
    fn entry(&self, node: &str) -> Result<NodeEntry, StateError> {
        if let Some(entry) = self.nodes.read().get(node) {
            return Ok(entry.clone());
        }

        let record = self.topology.get_node_by_id(node).map_err(|err| {
            if err.is_not_found() {
                StateError::NotFound(node.into())
            } else {
                err.into()
            }
        })?;

        let mut nodes = self.nodes.write();
        let entry = nodes.entry(record.id.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(NodeStatus {
                node_state: record.node_state,
                services: record
                    .services
                    .iter()
                    .map(|(service, info)| (service.clone(), info.service_state))
                    .collect(),
                last_heartbeat: None,
                replayed: self.emitter.is_active(),
            }))
        });
        Ok(entry.clone())
    }

    fn set_node_state(
        &self,
        node: &NodeId,
        status: &mut NodeStatus,
        to: NodeState,
    ) -> Result<NodeState, StateError> {
        let from = status.node_state;
        if from == to {
            return Ok(from);
        }

        self.topology.set_node_state(node.as_str(), to)?;
        status.node_state = to;
        self.metrics.node_transition(to);
        info!(%node, %from, %to, "node state changed");

        if status.replayed {
            self.emitter.emit_all(status.node_items(node, false));
        }
        Ok(from)
    }

    fn set_service_state(
        &self,
        node: &NodeId,
        status: &mut NodeStatus,
        service: &str,
        to: ServiceState,
    ) -> Result<ServiceState, StateError> {
        let service = ServiceName::from(service);
        let from = status
            .services
            .get(&service)
            .copied()
            .unwrap_or(ServiceState::Unavailable);
        if from == to {
            return Ok(from);
        }

        self.topology
            .set_service_state(node.as_str(), service.as_str(), to)?;
        status.services.insert(service.clone(), to);
        self.metrics.service_transition(to);
        debug!(%node, %service, %from, %to, "service state changed");

        if status.replayed {
            self.emitter.emit(status.service_item(node, &service, to));
        }
        Ok(from)
    }

    /// Complete registration: `Unregistered` becomes `Offline`.
    ///
    /// Registering an already registered node is a no-op.
    pub fn register(&self, node: &str) -> Result<NodeState, StateError> {
        let entry = self.entry(node)?;
        let mut status = entry.lock();
        let id = NodeId::from(node);
        if status.node_state == NodeState::Unregistered {
            self.set_node_state(&id, &mut status, NodeState::Offline)?;
        }
        Ok(status.node_state)
    }

    /// Record a heartbeat. An `Offline` node becomes `Online`.
    pub fn heartbeat(&self, node: &str) -> Result<NodeState, StateError> {
        let entry = self.entry(node)?;
        let mut status = entry.lock();
        let id = NodeId::from(node);
        if status.node_state == NodeState::Unregistered {
            return Err(StateError::InvalidTransition {
                node: id,
                state: status.node_state,
                action: "heartbeat",
            });
        }

        status.last_heartbeat = Some(Instant::now());
        if status.node_state == NodeState::Offline {
            self.set_node_state(&id, &mut status, NodeState::Online)?;
        }
        Ok(status.node_state)
    }

    /// Move every `Online` node whose last heartbeat is older than the
    /// liveness window to `Offline`. Returns the nodes moved.
    pub fn sweep(&self, now: Instant) -> Vec<NodeId> {
        let entries: Vec<(NodeId, NodeEntry)> = self
            .nodes
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();

        let mut timed_out = Vec::new();
        for (id, entry) in entries {
            let mut status = entry.lock();
            if status.node_state != NodeState::Online
                || status.heartbeat_fresh(now, self.config.window)
            {
                continue;
            }
            match self.set_node_state(&id, &mut status, NodeState::Offline) {
                Ok(_) => timed_out.push(id),
                Err(err) => warn!(node = %id, %err, "failed to mark silent node offline"),
            }
        }

        if !timed_out.is_empty() {
            self.metrics.liveness_timeouts(timed_out.len());
            debug!(count = timed_out.len(), "liveness sweep moved nodes offline");
        }
        timed_out
    }

    /// Run [`Self::sweep`] every sweep interval until `cancel` fires.
    pub async fn run_liveness_monitor(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.sweep(Instant::now());
                }
            }
        }
        debug!("liveness monitor stopped");
    }

    /// Apply a service state decided by a dispatch outcome. Returns the previous state.
    pub fn apply_service_state(
        &self,
        node: &str,
        service: &str,
        state: ServiceState,
    ) -> Result<ServiceState, StateError> {
        let entry = self.entry(node)?;
        let mut status = entry.lock();
        self.set_service_state(&NodeId::from(node), &mut status, service, state)
    }

    /// A node reported a runtime failure of `service`: it becomes `Malfunctioning`.
    pub fn report_runtime_error(
        &self,
        node: &str,
        service: &str,
        message: &str,
    ) -> Result<ServiceState, StateError> {
        warn!(%node, %service, %message, "service runtime error reported");
        self.apply_service_state(node, service, ServiceState::Malfunctioning)
    }

    /// Stop tracking `service` on `node` and publish it as `Unavailable`.
    pub fn untrack_service(&self, node: &str, service: &str) -> Result<(), StateError> {
        let entry = self.entry(node)?;
        let mut status = entry.lock();
        let id = NodeId::from(node);
        let service = ServiceName::from(service);
        if status.services.remove(&service).is_some() && status.replayed {
            self.emitter
                .emit(status.service_item(&id, &service, ServiceState::Unavailable));
        }
        Ok(())
    }

    /// Operator transition into `Maintenance`.
    pub fn enter_maintenance(&self, node: &str) -> Result<NodeState, StateError> {
        let entry = self.entry(node)?;
        let mut status = entry.lock();
        let id = NodeId::from(node);
        if status.node_state == NodeState::Unregistered {
            return Err(StateError::InvalidTransition {
                node: id,
                state: status.node_state,
                action: "enter maintenance",
            });
        }
        self.set_node_state(&id, &mut status, NodeState::Maintenance)
    }

    /// Operator transition out of `Maintenance`: `Online` if the last
    /// heartbeat is within the liveness window, `Offline` otherwise.
    pub fn exit_maintenance(&self, node: &str) -> Result<NodeState, StateError> {
        let entry = self.entry(node)?;
        let mut status = entry.lock();
        let id = NodeId::from(node);
        if status.node_state != NodeState::Maintenance {
            return Err(StateError::InvalidTransition {
                node: id,
                state: status.node_state,
                action: "exit maintenance",
            });
        }
        let to = if status.heartbeat_fresh(Instant::now(), self.config.window) {
            NodeState::Online
        } else {
            NodeState::Offline
        };
        self.set_node_state(&id, &mut status, to)?;
        Ok(to)
    }

    /// Drop all state of a node removed from the topology.
    pub fn forget(&self, node: &str) {
        if self.nodes.write().remove(node).is_some() {
            debug!(%node, "node state forgotten");
        }
    }

    pub fn node_state(&self, node: &str) -> Option<NodeState> {
        self.entry(node).ok().map(|entry| entry.lock().node_state)
    }

    /// State of `service` on `node`; `Unavailable` if either is unknown.
    pub fn service_state(&self, node: &str, service: &str) -> ServiceState {
        self.entry(node)
            .ok()
            .and_then(|entry| entry.lock().services.get(service).copied())
            .unwrap_or(ServiceState::Unavailable)
    }

    pub fn last_heartbeat(&self, node: &str) -> Option<Instant> {
        self.entry(node).ok().and_then(|entry| entry.lock().last_heartbeat)
    }

    /// Subscribe to node state changes. Allowed once per tracker.
    ///
    /// The stream first yields one snapshot item per known (node, service)
    /// pair, or one item without a service for nodes without services, then
    /// every subsequent change. Order is preserved per node. The stream ends
    /// after [`Self::shutdown`].
    pub fn subscribe_node_state_changes(&self) -> Result<StateChangeStream, StateError> {
        if !self.emitter.claim() {
            return Err(StateError::AlreadySubscribed);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        // Holding the map read lock keeps new entries out until every
        // existing entry has been replayed.
        let nodes = self.nodes.read();
        self.emitter.install(tx);

        let mut ids: Vec<&NodeId> = nodes.keys().collect();
        ids.sort();
        for id in ids {
            if let Some(entry) = nodes.get(id) {
                let mut status = entry.lock();
                self.emitter.emit_all(status.node_items(id, true));
                status.replayed = true;
            }
        }
        info!(nodes = nodes.len(), "node state changes subscribed");
        Ok(rx)
    }

    /// Close the state-change stream.
    pub fn shutdown(&self) {
        self.emitter.close();
        debug!("state tracker shut down");
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use strata_primitives::{Network, Node, NodeType, ServiceInfo};

    use super::*;

    async fn topology_with(nodes: &[(&str, &[&str])]) -> Arc<Topology> {
        let topology = Arc::new(Topology::in_memory());
        topology
            .create_network(Network::root("net", "net"))
            .await
            .unwrap();
        for (id, services) in nodes {
            topology
                .create_node(Node::new(*id, NodeType::Server, "net"))
                .await
                .unwrap();
            for service in *services {
                topology
                    .install_service(id, service, ServiceInfo::installed(None))
                    .unwrap();
            }
        }
        topology
    }

    fn config() -> LivenessConfig {
        LivenessConfig {
            window: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_and_liveness() {
        let topology = topology_with(&[("n1", &[])]).await;
        let tracker = StateTracker::new(topology.clone(), config());

        assert_eq!(tracker.node_state("n1"), Some(NodeState::Unregistered));
        assert_matches!(
            tracker.heartbeat("n1"),
            Err(StateError::InvalidTransition { action: "heartbeat", .. })
        );

        assert_eq!(tracker.register("n1").unwrap(), NodeState::Offline);
        assert_eq!(tracker.heartbeat("n1").unwrap(), NodeState::Online);
        assert_eq!(
            topology.get_node_by_id("n1").unwrap().node_state,
            NodeState::Online
        );

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(tracker.sweep(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(tracker.sweep(Instant::now()), ["n1"]);
        assert_eq!(tracker.node_state("n1"), Some(NodeState::Offline));
        assert_eq!(
            topology.get_node_by_id("n1").unwrap().node_state,
            NodeState::Offline
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_is_operator_driven() {
        let topology = topology_with(&[("n1", &[])]).await;
        let tracker = StateTracker::new(topology, config());
        tracker.register("n1").unwrap();
        tracker.heartbeat("n1").unwrap();

        tracker.enter_maintenance("n1").unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(tracker.sweep(Instant::now()).is_empty());
        assert_eq!(tracker.heartbeat("n1").unwrap(), NodeState::Maintenance);

        // heartbeat above was fresh
        assert_eq!(tracker.exit_maintenance("n1").unwrap(), NodeState::Online);

        tracker.enter_maintenance("n1").unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(tracker.exit_maintenance("n1").unwrap(), NodeState::Offline);
        assert_matches!(
            tracker.exit_maintenance("n1"),
            Err(StateError::InvalidTransition { .. })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_states() {
        let topology = topology_with(&[("n1", &["fw"])]).await;
        let tracker = StateTracker::new(topology.clone(), config());

        assert_eq!(tracker.service_state("n1", "fw"), ServiceState::Uninitialized);
        assert_eq!(
            tracker
                .apply_service_state("n1", "fw", ServiceState::Running)
                .unwrap(),
            ServiceState::Uninitialized
        );
        tracker.report_runtime_error("n1", "fw", "crashed").unwrap();
        assert_eq!(tracker.service_state("n1", "fw"), ServiceState::Malfunctioning);
        assert_eq!(
            topology.get_node_by_id("n1").unwrap().service_state("fw"),
            ServiceState::Malfunctioning
        );

        // not installed on the node
        assert_matches!(
            tracker.apply_service_state("n1", "dns", ServiceState::Running),
            Err(StateError::Topology(_))
        );
        assert_matches!(
            tracker.apply_service_state("ghost", "fw", ServiceState::Running),
            Err(StateError::NotFound(_))
        );
        assert_eq!(tracker.service_state("ghost", "fw"), ServiceState::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_replays_then_streams() {
        let topology = topology_with(&[("n1", &["dns", "fw"]), ("n2", &[])]).await;
        let tracker = StateTracker::new(topology.clone(), config());
        tracker.register("n1").unwrap();

        let mut stream = tracker.subscribe_node_state_changes().unwrap();
        assert_matches!(
            tracker.subscribe_node_state_changes(),
            Err(StateError::AlreadySubscribed)
        );

        let mut snapshot = Vec::new();
        for _ in 0..3 {
            snapshot.push(stream.recv().await.unwrap());
        }
        assert!(snapshot.iter().all(|c| c.snapshot));
        let pairs: Vec<_> = snapshot
            .iter()
            .map(|c| (c.node_id.as_str().to_owned(), c.service.as_ref().map(|s| s.to_string())))
            .collect();
        assert_eq!(
            pairs,
            [
                ("n1".to_owned(), Some("dns".to_owned())),
                ("n1".to_owned(), Some("fw".to_owned())),
                ("n2".to_owned(), None),
            ]
        );
        assert!(snapshot.iter().take(2).all(|c| c.node_state == NodeState::Offline));

        tracker.heartbeat("n1").unwrap();
        tracker
            .apply_service_state("n1", "fw", ServiceState::Initialized)
            .unwrap();

        // node transition: one item per service
        let a = stream.recv().await.unwrap();
        let b = stream.recv().await.unwrap();
        assert!(!a.snapshot && !b.snapshot);
        assert_eq!((a.node_state, b.node_state), (NodeState::Online, NodeState::Online));

        let c = stream.recv().await.unwrap();
        assert_eq!(c.service.as_ref().map(|s| s.as_str()), Some("fw"));
        assert_eq!(c.service_state, Some(ServiceState::Initialized));

        // nodes created after subscribing stream their changes too
        topology
            .create_node(Node::new("n3", NodeType::Server, "net"))
            .await
            .unwrap();
        tracker.register("n3").unwrap();
        let d = stream.recv().await.unwrap();
        assert_eq!(d.node_id, "n3");
        assert_eq!(d.node_state, NodeState::Offline);
        assert!(!d.snapshot);

        tracker.shutdown();
        assert!(stream.recv().await.is_none());
        assert_matches!(
            tracker.subscribe_node_state_changes(),
            Err(StateError::AlreadySubscribed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_monitor_until_cancelled() {
        let topology = topology_with(&[("n1", &[])]).await;
        let tracker = Arc::new(StateTracker::new(topology, config()));
        tracker.register("n1").unwrap();
        tracker.heartbeat("n1").unwrap();

        let cancel = CancellationToken::new();
        let monitor = {
            let tracker = tracker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { tracker.run_liveness_monitor(cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(tracker.node_state("n1"), Some(NodeState::Offline));

        cancel.cancel();
        monitor.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_untrack_and_forget() {
        let topology = topology_with(&[("n1", &["fw"])]).await;
        let tracker = StateTracker::new(topology.clone(), config());
        let mut stream = tracker.subscribe_node_state_changes().unwrap();
        let _ = stream.recv().await.unwrap();

        tracker.untrack_service("n1", "fw").unwrap();
        let change = stream.recv().await.unwrap();
        assert_eq!(change.service_state, Some(ServiceState::Unavailable));
        assert_eq!(tracker.service_state("n1", "fw"), ServiceState::Unavailable);

        topology.delete_node("n1").await.unwrap();
        tracker.forget("n1");
        assert_eq!(tracker.node_state("n1"), None);
    }
}
