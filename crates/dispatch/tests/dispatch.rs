//! Dispatcher behaviour against a scripted transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use strata_dispatch::{
    CommandResponse, DispatchConfig, DispatchError, DispatchOutcome, DispatchRequest, Dispatcher,
    FrameworkError, NodeCommand, NodeTransport, ServiceCommand, ServiceError, TransportError,
};
use strata_primitives::{Network, Node, NodeGroup, NodeId, NodeType, ServiceInfo, ServiceScope, ServiceState};
use strata_resolver::ConfigResolver;
use strata_state::{LivenessConfig, StateTracker};
use strata_topology::Topology;

const FW: &str = "fw";

#[derive(Debug, Clone)]
enum Behavior {
    Ack,
    Hang,
    Fail,
    Fatal,
    Disconnect,
}

#[derive(Debug, Default)]
struct ScriptedTransport {
    behavior: Mutex<HashMap<NodeId, Behavior>>,
    calls: Mutex<HashMap<NodeId, Vec<NodeCommand>>>,
}

impl ScriptedTransport {
    fn set(&self, node: &str, behavior: Behavior) {
        self.behavior.lock().insert(node.into(), behavior);
    }

    fn calls(&self, node: &str) -> Vec<NodeCommand> {
        self.calls.lock().get(node).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl NodeTransport for ScriptedTransport {
    async fn send_command(
        &self,
        node: &NodeId,
        _service: &str,
        command: NodeCommand,
    ) -> Result<CommandResponse, TransportError> {
        self.calls.lock().entry(node.clone()).or_default().push(command);
        let behavior = self.behavior.lock().get(node).cloned().unwrap_or(Behavior::Ack);
        match behavior {
            Behavior::Ack => Ok(CommandResponse::new(Bytes::from_static(b"ok"))),
            Behavior::Hang => std::future::pending().await,
            Behavior::Fail => Err(ServiceError::new("config rejected").into()),
            Behavior::Fatal => Err(ServiceError::fatal("binary missing").into()),
            Behavior::Disconnect => Err(TransportError::Disconnected("reset by peer".into())),
        }
    }
}

struct Harness {
    topology: Arc<Topology>,
    state: Arc<StateTracker>,
    resolver: Arc<ConfigResolver>,
    transport: Arc<ScriptedTransport>,
    dispatcher: Dispatcher,
}

impl Harness {
    /// Nodes in network `site`, each with `fw` installed. `online` nodes
    /// heartbeat, the others are only registered.
    async fn new(nodes: &[(&str, bool)]) -> Self {
        let topology = Arc::new(Topology::in_memory());
        topology.create_network(Network::root("root", "root")).await.unwrap();
        topology
            .create_network(Network::child_of("site", "site", "root"))
            .await
            .unwrap();
        for (id, _) in nodes {
            topology
                .create_node(Node::new(*id, NodeType::Firewall, "site"))
                .await
                .unwrap();
            topology
                .install_service(id, FW, ServiceInfo::installed(Some("v1.0".into())))
                .unwrap();
        }

        let state = Arc::new(StateTracker::new(topology.clone(), LivenessConfig::default()));
        for (id, online) in nodes {
            state.register(id).unwrap();
            if *online {
                state.heartbeat(id).unwrap();
            }
        }

        let resolver = Arc::new(ConfigResolver::new(topology.clone()));
        let transport = Arc::new(ScriptedTransport::default());
        let dispatcher = Dispatcher::new(
            topology.clone(),
            state.clone(),
            resolver.clone(),
            transport.clone(),
            DispatchConfig::default(),
        );
        Self {
            topology,
            state,
            resolver,
            transport,
            dispatcher,
        }
    }

    async fn run(&self, request: DispatchRequest) -> Vec<DispatchOutcome> {
        self.dispatcher.dispatch(request).unwrap().collect_all().await
    }

    async fn run_one(&self, node: &str, command: ServiceCommand) -> DispatchOutcome {
        let mut outcomes = self.run(DispatchRequest::to_nodes([node], FW, command)).await;
        assert_eq!(outcomes.len(), 1);
        outcomes.remove(0)
    }

    fn service_state(&self, node: &str) -> ServiceState {
        self.state.service_state(node, FW)
    }
}

fn by_node(outcomes: Vec<DispatchOutcome>) -> HashMap<String, DispatchOutcome> {
    outcomes
        .into_iter()
        .map(|outcome| (outcome.node_id.to_string(), outcome))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_group_start_skips_offline_member() {
    let h = Harness::new(&[("n1", true), ("n2", false)]).await;
    h.topology
        .create_node_group(NodeGroup::new("g1", "site", FW))
        .await
        .unwrap();
    h.topology.add_nodes_to_group("g1", ["n1", "n2"]).await.unwrap();

    let cfg = Bytes::from_static(b"rules: []");
    let outcomes = h
        .run(DispatchRequest::new(
            ServiceScope::NodeGroup,
            ["g1"],
            FW,
            ServiceCommand::start_with(cfg.clone()),
        ))
        .await;
    assert_eq!(outcomes.len(), 2);

    let outcomes = by_node(outcomes);
    assert!(outcomes["n1"].is_ok());
    assert_eq!(h.service_state("n1"), ServiceState::Running);
    assert_eq!(h.resolver.used_config("n1", FW).unwrap(), Some(cfg));

    assert_matches!(outcomes["n2"].result, Err(FrameworkError::NodeDisconnected));
    assert_eq!(outcomes["n2"].attempts, 0);
    assert!(h.transport.calls("n2").is_empty());
    assert_eq!(h.service_state("n2"), ServiceState::Uninitialized);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_node_is_isolated() {
    let h = Harness::new(&[("n1", true), ("n2", true), ("n3", true), ("n4", true)]).await;
    h.transport.set("n3", Behavior::Hang);

    let started = tokio::time::Instant::now();
    let outcomes = h
        .run(DispatchRequest::new(ServiceScope::Network, ["site"], FW, ServiceCommand::start()))
        .await;
    let elapsed = started.elapsed();

    assert_eq!(outcomes.len(), 4);
    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 3);
    let outcomes = by_node(outcomes);
    assert_matches!(
        outcomes["n3"].result,
        Err(FrameworkError::ServiceTimeout { attempts: 3 })
    );
    assert!(elapsed <= h.dispatcher.config().holding_budget());
    assert_eq!(h.service_state("n3"), ServiceState::Malfunctioning);
    assert_eq!(h.service_state("n1"), ServiceState::Running);
}

#[tokio::test(start_paused = true)]
async fn test_failing_node_gets_exactly_three_attempts() {
    let h = Harness::new(&[("n1", true)]).await;
    h.transport.set("n1", Behavior::Fail);

    let outcome = h.run_one("n1", ServiceCommand::start_with("cfg")).await;
    assert_eq!(outcome.attempts, 3);
    assert_matches!(outcome.result, Err(FrameworkError::Service(ServiceError { fatal: false, .. })));
    assert_eq!(h.service_state("n1"), ServiceState::Malfunctioning);

    tokio::time::sleep(Duration::from_secs(120)).await;
    let calls = h.transport.calls("n1");
    assert_eq!(calls.len(), 3);
    // every attempt carries the same payload
    assert!(calls.iter().all(|c| *c == calls[0]));
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_ends_retries() {
    let h = Harness::new(&[("n1", true)]).await;
    h.transport.set("n1", Behavior::Fatal);

    let outcome = h.run_one("n1", ServiceCommand::Reset).await;
    assert_eq!(outcome.attempts, 1);
    assert_matches!(outcome.result, Err(FrameworkError::Service(ServiceError { fatal: true, .. })));
    assert_eq!(h.service_state("n1"), ServiceState::Malfunctioning);
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_keeps_running() {
    let h = Harness::new(&[("n1", true)]).await;
    let mut changes = h.state.subscribe_node_state_changes().unwrap();
    // snapshot
    assert_eq!(changes.recv().await.unwrap().service_state, Some(ServiceState::Uninitialized));

    assert!(h.run_one("n1", ServiceCommand::start_with("a")).await.is_ok());
    assert_eq!(changes.recv().await.unwrap().service_state, Some(ServiceState::Configuring));
    assert_eq!(changes.recv().await.unwrap().service_state, Some(ServiceState::Running));

    assert!(h.run_one("n1", ServiceCommand::start_with("b")).await.is_ok());
    assert_eq!(h.service_state("n1"), ServiceState::Running);
    assert!(changes.try_recv().is_err());
    // the payload is still delivered
    assert_eq!(h.transport.calls("n1").len(), 2);
    assert_eq!(h.resolver.used_config("n1", FW).unwrap(), Some(Bytes::from_static(b"b")));
}

#[tokio::test(start_paused = true)]
async fn test_failed_stop_is_not_retried_and_keeps_state() {
    let h = Harness::new(&[("n1", true)]).await;
    assert!(h.run_one("n1", ServiceCommand::start_with("cfg")).await.is_ok());

    h.transport.set("n1", Behavior::Hang);
    let outcome = h.run_one("n1", ServiceCommand::Stop).await;
    assert_eq!(outcome.attempts, 1);
    assert_matches!(outcome.result, Err(FrameworkError::ServiceTimeout { attempts: 1 }));
    assert_eq!(h.service_state("n1"), ServiceState::Running);

    h.transport.set("n1", Behavior::Ack);
    assert!(h.run_one("n1", ServiceCommand::Stop).await.is_ok());
    assert_eq!(h.service_state("n1"), ServiceState::Initialized);
}

#[tokio::test(start_paused = true)]
async fn test_reset_and_apply_ops() {
    let h = Harness::new(&[("n1", true)]).await;

    let outcome = h.run_one("n1", ServiceCommand::apply_ops("flush", "{}")).await;
    assert_matches!(
        outcome.result,
        Err(FrameworkError::ServiceStateNotAllowed(ServiceState::Uninitialized))
    );
    assert!(h.transport.calls("n1").is_empty());

    assert!(h.run_one("n1", ServiceCommand::Reset).await.is_ok());
    assert_eq!(h.service_state("n1"), ServiceState::Initialized);

    let outcome = h.run_one("n1", ServiceCommand::apply_ops("flush", "{}")).await;
    assert_eq!(outcome.result.unwrap().payload, Bytes::from_static(b"ok"));
    assert_eq!(h.service_state("n1"), ServiceState::Initialized);
}

#[tokio::test(start_paused = true)]
async fn test_start_resolves_effective_config() {
    let h = Harness::new(&[("n1", true)]).await;
    h.resolver.register_default(FW, Bytes::from_static(b"default"));
    h.resolver
        .set_config_of_network("site", FW, Bytes::from_static(b"site"))
        .await
        .unwrap();

    assert!(h.run_one("n1", ServiceCommand::start()).await.is_ok());
    assert_eq!(
        h.transport.calls("n1"),
        vec![NodeCommand::Start {
            config: Bytes::from_static(b"site")
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejections_before_sending() {
    let h = Harness::new(&[("n1", true), ("n2", true)]).await;
    h.state.enter_maintenance("n2").unwrap();

    let outcome = h.run_one("n2", ServiceCommand::start()).await;
    assert_matches!(outcome.result, Err(FrameworkError::NodeDisconnected));

    let outcome = h
        .run(DispatchRequest::to_nodes(["n1"], "dns", ServiceCommand::start()))
        .await;
    assert_matches!(outcome[0].result, Err(FrameworkError::ServiceUnavailable));

    assert_matches!(
        h.dispatcher
            .dispatch(DispatchRequest::to_nodes(["n1", "ghost"], FW, ServiceCommand::start())),
        Err(DispatchError::NotFound { .. })
    );
    assert!(h.transport.calls("n1").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_empty_scope_yields_closed_stream() {
    let h = Harness::new(&[("n1", true)]).await;
    let handle = h
        .dispatcher
        .dispatch(DispatchRequest::new(ServiceScope::Network, ["root"], FW, ServiceCommand::Stop))
        .unwrap();
    assert!(handle.is_empty());
    assert!(handle.collect_all().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_restores_prior_state() {
    let h = Harness::new(&[("n1", true)]).await;
    h.transport.set("n1", Behavior::Disconnect);

    let outcome = h.run_one("n1", ServiceCommand::start()).await;
    assert_eq!(outcome.attempts, 1);
    assert_matches!(outcome.result, Err(FrameworkError::NodeDisconnected));
    assert_eq!(h.service_state("n1"), ServiceState::Uninitialized);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_reports_cancelled() {
    let h = Harness::new(&[("n1", true), ("n2", true)]).await;
    h.transport.set("n1", Behavior::Hang);
    h.transport.set("n2", Behavior::Hang);

    let mut handle = h
        .dispatcher
        .dispatch(DispatchRequest::to_nodes(["n1", "n2"], FW, ServiceCommand::start()))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.cancel();

    for _ in 0..2 {
        let outcome = handle.next_outcome().await.unwrap();
        assert_matches!(outcome.result, Err(FrameworkError::Cancelled));
        assert_eq!(outcome.attempts, 1);
    }
    assert!(handle.next_outcome().await.is_none());
    assert_eq!(h.service_state("n1"), ServiceState::Uninitialized);
    assert_eq!(h.service_state("n2"), ServiceState::Uninitialized);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_reset_keeps_service_usable() {
    let h = Harness::new(&[("n1", true)]).await;
    assert!(h.run_one("n1", ServiceCommand::start_with("cfg")).await.is_ok());

    h.transport.set("n1", Behavior::Hang);
    let mut handle = h
        .dispatcher
        .dispatch(DispatchRequest::to_nodes(["n1"], FW, ServiceCommand::Reset))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.cancel();
    assert_matches!(handle.next_outcome().await.unwrap().result, Err(FrameworkError::Cancelled));

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.service_state("n1"), ServiceState::Running);

    h.transport.set("n1", Behavior::Ack);
    assert!(h.run_one("n1", ServiceCommand::apply_ops("flush", "{}")).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_stop_needs_initialized_service() {
    let h = Harness::new(&[("n1", true)]).await;

    let outcome = h.run_one("n1", ServiceCommand::Stop).await;
    assert_eq!(outcome.attempts, 0);
    assert_matches!(
        outcome.result,
        Err(FrameworkError::ServiceStateNotAllowed(ServiceState::Uninitialized))
    );
    assert!(h.transport.calls("n1").is_empty());
    assert_eq!(h.service_state("n1"), ServiceState::Uninitialized);

    assert!(h.run_one("n1", ServiceCommand::Reset).await.is_ok());
    assert!(h.run_one("n1", ServiceCommand::Stop).await.is_ok());
    assert_eq!(h.service_state("n1"), ServiceState::Initialized);
}

#[tokio::test(start_paused = true)]
async fn test_node_lock_serialises_commands() {
    let h = Harness::new(&[("n1", true)]).await;
    assert!(h.run_one("n1", ServiceCommand::start_with("cfg")).await.is_ok());
    h.transport.set("n1", Behavior::Hang);

    let first = h
        .dispatcher
        .dispatch(DispatchRequest::to_nodes(["n1"], FW, ServiceCommand::Stop))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.topology.locks().is_locked("node/n1"));

    h.transport.set("n1", Behavior::Ack);
    let second = h
        .dispatcher
        .dispatch(DispatchRequest::to_nodes(["n1"], FW, ServiceCommand::Stop))
        .unwrap();

    let first = first.collect_all().await;
    assert_matches!(first[0].result, Err(FrameworkError::ServiceTimeout { .. }));
    let second = second.collect_all().await;
    assert!(second[0].is_ok());
    // the second command waited out the first one's attempt
    assert!(second[0].elapsed >= Duration::from_secs(19));
    assert!(!h.topology.locks().is_locked("node/n1"));
}
