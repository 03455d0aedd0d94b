use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use strata_dispatch::{
    DispatchConfig, DispatchHandle, DispatchRequest, Dispatcher, NodeTransport, ServiceCommand,
};
use strata_lock::LockManager;
use strata_primitives::{
    Node, NodeGroup, NodeId, NodeState, ServiceInfo, ServiceName, ServiceScope, ServiceState,
};
use strata_resolver::ConfigResolver;
use strata_servicenode::{Upcall, UpcallReceiver};
use strata_shared_data::SharedDataDescriptor;
use strata_state::{StateChangeStream, StateTracker};
use strata_topology::{
    FileTopologyStore, MemoryTopologyStore, Topology, TopologyError, TopologyPersistence,
};
use strata_version::Version;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metadata::{MetadataKey, MetadataLayer, MetadataStore, check_record};
use crate::service::{CliCommand, ControllerApi, ServiceController, ServiceStatus};

/// The control plane: topology, state, config, dispatch and the registered
/// service controllers.
#[derive(Debug)]
pub struct Controller {
    config: ControllerConfig,
    topology: Arc<Topology>,
    state: Arc<StateTracker>,
    resolver: Arc<ConfigResolver>,
    dispatcher: Dispatcher,
    metadata: Arc<MetadataStore>,
    services: RwLock<BTreeMap<ServiceName, Arc<dyn ServiceController>>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Open the topology named by `config.storage` and build every component.
    pub fn new(config: ControllerConfig, transport: Arc<dyn NodeTransport>) -> Result<Self, ControllerError> {
        config.validate()?;
        let persistence: Arc<dyn TopologyPersistence> = match &config.storage.topology_path {
            Some(path) => Arc::new(
                FileTopologyStore::new_with_create_dir(path).map_err(TopologyError::from)?,
            ),
            None => Arc::new(MemoryTopologyStore::new()),
        };
        let topology = Topology::new(persistence, LockManager::new(config.lock_defaults()))?;
        Ok(Self::with_topology(config, Arc::new(topology), transport))
    }

    /// Build the components around an existing topology.
    pub fn with_topology(
        config: ControllerConfig,
        topology: Arc<Topology>,
        transport: Arc<dyn NodeTransport>,
    ) -> Self {
        let state = Arc::new(StateTracker::new(topology.clone(), config.liveness_config()));
        let resolver = Arc::new(ConfigResolver::new(topology.clone()));
        let dispatcher = Dispatcher::new(
            topology.clone(),
            state.clone(),
            resolver.clone(),
            transport,
            config.dispatch_config(),
        );
        Self {
            config,
            topology,
            state,
            resolver,
            dispatcher,
            metadata: Arc::default(),
            services: RwLock::default(),
            shutdown: CancellationToken::new(),
            tasks: Mutex::default(),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        self.dispatcher.config()
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn state(&self) -> &Arc<StateTracker> {
        &self.state
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.resolver
    }

    fn api(&self, service: ServiceName) -> ControllerApi {
        ControllerApi::new(
            service,
            self.topology.clone(),
            self.state.clone(),
            self.resolver.clone(),
            self.dispatcher.clone(),
            self.metadata.clone(),
        )
    }

    fn ensure_running(&self) -> Result<(), ControllerError> {
        if self.shutdown.is_cancelled() {
            return Err(ControllerError::ShutDown);
        }
        Ok(())
    }

    // --- services ---

    /// Load a service controller: check its version, initialise it and
    /// register its default config.
    pub async fn register_service(&self, service: Arc<dyn ServiceController>) -> Result<(), ControllerError> {
        self.ensure_running()?;
        let name = ServiceName::from(service.name());
        let version = service.version();
        if self.services.read().contains_key(&name) {
            return Err(ControllerError::ServiceAlreadyRegistered(name));
        }
        self.config.compatibility.range_for(name.as_str()).check(&version)?;

        service
            .init(self.api(name.clone()))
            .await
            .map_err(|source| ControllerError::ServiceInit {
                service: name.clone(),
                source,
            })?;

        let inserted = match self.services.write().entry(name.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(service.clone());
                true
            }
        };
        if !inserted {
            service.finish().await;
            return Err(ControllerError::ServiceAlreadyRegistered(name));
        }

        self.resolver
            .register_default(name.as_str(), service.default_config());
        info!(service = %name, %version, "service registered");
        Ok(())
    }

    pub fn service(&self, name: &str) -> Option<Arc<dyn ServiceController>> {
        self.services.read().get(name).cloned()
    }

    pub fn services(&self) -> Vec<ServiceName> {
        self.services.read().keys().cloned().collect()
    }

    fn registered(&self, name: &str) -> Result<Arc<dyn ServiceController>, ControllerError> {
        self.service(name)
            .ok_or_else(|| ControllerError::ServiceNotRegistered(name.into()))
    }

    /// Operator commands of every registered service.
    pub fn cli_commands(&self) -> BTreeMap<ServiceName, Vec<CliCommand>> {
        self.services
            .read()
            .iter()
            .map(|(name, service)| (name.clone(), service.cli_commands()))
            .collect()
    }

    pub fn shared_data_descriptors(&self) -> BTreeMap<ServiceName, SharedDataDescriptor> {
        self.services
            .read()
            .iter()
            .map(|(name, service)| (name.clone(), service.shared_data()))
            .collect()
    }

    /// Install `service` on `node` after checking the plugin version the
    /// node reported. The service starts `Uninitialized`.
    pub async fn add_service_to_node(
        &self,
        node: &str,
        service: &str,
        plugin_version: Version,
    ) -> Result<(), ControllerError> {
        self.ensure_running()?;
        self.topology.get_node_by_id(node)?;
        self.registered(service)?;
        self.config
            .compatibility
            .range_for(service)
            .check(&plugin_version)?;

        self.topology.install_service(
            node,
            service,
            ServiceInfo::installed(Some(plugin_version.to_string())),
        )?;
        self.state
            .apply_service_state(node, service, ServiceState::Uninitialized)?;
        info!(%node, %service, version = %plugin_version, "service added to node");
        Ok(())
    }

    pub async fn remove_service_from_node(&self, node: &str, service: &str) -> Result<(), ControllerError> {
        self.topology.uninstall_service(node, service).await?;
        self.state.untrack_service(node, service)?;
        self.metadata
            .remove_service(MetadataLayer::Node, node, service);
        info!(%node, %service, "service removed from node");
        Ok(())
    }

    pub fn service_status(&self, node: &str, service: &str) -> Result<ServiceStatus, ControllerError> {
        let node_id = self.topology.get_node_by_id(node)?.id;
        let controller = self.registered(service)?;
        let state = self.state.service_state(node, service);
        Ok(ServiceStatus {
            enabled: state == ServiceState::Running,
            state,
            extra: controller.status_extra(&node_id),
        })
    }

    // --- nodes ---

    /// Add a node to the topology. It stays `Unregistered` until
    /// [`Self::complete_registration`].
    pub async fn create_node(&self, node: Node) -> Result<Node, ControllerError> {
        self.ensure_running()?;
        Ok(self.topology.create_node(node).await?)
    }

    pub fn complete_registration(&self, node: &str) -> Result<NodeState, ControllerError> {
        Ok(self.state.register(node)?)
    }

    pub fn heartbeat(&self, node: &str) -> Result<NodeState, ControllerError> {
        Ok(self.state.heartbeat(node)?)
    }

    pub fn enter_maintenance(&self, node: &str) -> Result<NodeState, ControllerError> {
        Ok(self.state.enter_maintenance(node)?)
    }

    pub fn exit_maintenance(&self, node: &str) -> Result<NodeState, ControllerError> {
        Ok(self.state.exit_maintenance(node)?)
    }

    /// Remove a node with its links, memberships, state and metadata.
    pub async fn delete_node(&self, node: &str) -> Result<Node, ControllerError> {
        let removed = self.topology.delete_node(node).await?;
        self.state.forget(node);
        self.metadata.remove_record(MetadataLayer::Node, node);
        Ok(removed)
    }

    /// Remove an empty network with its metadata.
    pub async fn delete_network(&self, network: &str) -> Result<(), ControllerError> {
        self.topology.delete_network(network).await?;
        self.metadata.remove_record(MetadataLayer::Network, network);
        Ok(())
    }

    /// Remove a node group with its metadata. Members stay in the topology.
    pub async fn delete_node_group(&self, group: &str) -> Result<NodeGroup, ControllerError> {
        let removed = self.topology.delete_node_group(group).await?;
        self.metadata.remove_record(MetadataLayer::NodeGroup, group);
        Ok(removed)
    }

    // --- commands ---

    pub fn dispatch(&self, request: DispatchRequest) -> Result<DispatchHandle, ControllerError> {
        self.ensure_running()?;
        self.registered(request.service.as_str())?;
        Ok(self.dispatcher.dispatch(request)?)
    }

    /// Start `service`. Without `config` each node gets its effective config.
    pub fn start<I, T>(
        &self,
        scope: ServiceScope,
        targets: I,
        service: &str,
        config: Option<Bytes>,
    ) -> Result<DispatchHandle, ControllerError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.dispatch(DispatchRequest::new(
            scope,
            targets,
            service,
            ServiceCommand::Start { config },
        ))
    }

    pub fn stop<I, T>(&self, scope: ServiceScope, targets: I, service: &str) -> Result<DispatchHandle, ControllerError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.dispatch(DispatchRequest::new(scope, targets, service, ServiceCommand::Stop))
    }

    pub fn reset<I, T>(&self, scope: ServiceScope, targets: I, service: &str) -> Result<DispatchHandle, ControllerError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.dispatch(DispatchRequest::new(scope, targets, service, ServiceCommand::Reset))
    }

    pub fn apply_ops<I, T>(
        &self,
        scope: ServiceScope,
        targets: I,
        service: &str,
        op_cmd: &str,
        op_params: &str,
    ) -> Result<DispatchHandle, ControllerError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.dispatch(DispatchRequest::new(
            scope,
            targets,
            service,
            ServiceCommand::apply_ops(op_cmd, op_params),
        ))
    }

    // --- metadata ---

    pub fn set_metadata(&self, key: MetadataKey, content: Bytes) -> Result<(), ControllerError> {
        check_record(&self.topology, key.layer, &key.id)?;
        debug!(%key, len = content.len(), "metadata stored");
        self.metadata.set(key, content);
        Ok(())
    }

    pub fn metadata(&self, key: &MetadataKey) -> Result<Bytes, ControllerError> {
        self.metadata
            .get(key)
            .ok_or_else(|| ControllerError::MetadataNotFound(key.to_string()))
    }

    pub fn delete_metadata(&self, key: &MetadataKey) -> Result<Bytes, ControllerError> {
        self.metadata
            .delete(key)
            .ok_or_else(|| ControllerError::MetadataNotFound(key.to_string()))
    }

    pub fn list_metadata(&self, layer: MetadataLayer, id: &str, service: &str) -> Vec<String> {
        self.metadata.list(layer, id, service)
    }

    // --- upcalls and background work ---

    /// Route one node upcall to its service controller or the state tracker.
    pub async fn handle_upcall(&self, upcall: Upcall) -> Result<(), ControllerError> {
        match upcall {
            Upcall::Message {
                node_id,
                service,
                payload,
            } => {
                let controller = self.registered(service.as_str())?;
                controller
                    .handle_message_from_service_node(&node_id, payload)
                    .await
                    .map_err(|source| ControllerError::ServiceMessage { service, source })
            }
            Upcall::RuntimeError {
                node_id,
                service,
                error,
            } => {
                self.state
                    .report_runtime_error(node_id.as_str(), service.as_str(), &error.message)?;
                Ok(())
            }
        }
    }

    /// Handle upcalls until the channel closes or the controller shuts down.
    pub async fn run_upcalls(&self, mut upcalls: UpcallReceiver) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                upcall = upcalls.recv() => {
                    let Some(upcall) = upcall else { break };
                    let node: NodeId = upcall.node_id().clone();
                    if let Err(err) = self.handle_upcall(upcall).await {
                        warn!(%node, %err, "upcall not handled");
                    }
                }
            }
        }
        debug!("upcall router stopped");
    }

    /// Spawn the liveness monitor and, if given, the upcall router.
    pub fn spawn_background(self: &Arc<Self>, upcalls: Option<UpcallReceiver>) {
        let mut tasks = self.tasks.lock();

        let state = self.state.clone();
        let cancel = self.shutdown.child_token();
        tasks.push(tokio::spawn(async move {
            state.run_liveness_monitor(cancel).await;
        }));

        if let Some(upcalls) = upcalls {
            let this = self.clone();
            tasks.push(tokio::spawn(async move {
                this.run_upcalls(upcalls).await;
            }));
        }
    }

    pub fn subscribe_node_state_changes(&self) -> Result<StateChangeStream, ControllerError> {
        Ok(self.state.subscribe_node_state_changes()?)
    }

    /// Stop background work and in-flight dispatches, finish every service
    /// and close the state-change stream. Later calls do nothing.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.dispatcher.shutdown();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                warn!(%err, "background task failed");
            }
        }

        let services: Vec<_> = std::mem::take(&mut *self.services.write()).into_values().collect();
        for service in services {
            service.finish().await;
        }

        self.state.shutdown();
        if let Err(err) = self.topology.flush() {
            warn!(%err, "failed to flush topology");
        }
        info!("controller shut down");
    }
}
