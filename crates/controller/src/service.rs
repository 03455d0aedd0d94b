use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use auto_impl::auto_impl;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strata_dispatch::{DispatchHandle, DispatchRequest, Dispatcher, ServiceCommand, ServiceError};
use strata_primitives::{Node, NodeId, ServiceName, ServiceScope, ServiceState};
use strata_resolver::{ConfigResolver, EffectiveConfig};
use strata_shared_data::SharedDataDescriptor;
use strata_state::StateTracker;
use strata_topology::Topology;
use strata_version::Version;

use crate::error::ControllerError;
use crate::metadata::{MetadataKey, MetadataLayer, MetadataStore, check_record};

/// An operator command contributed by a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliCommand {
    pub name: String,
    pub about: String,
}

impl CliCommand {
    pub fn new(name: impl Into<String>, about: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            about: about.into(),
        }
    }
}

/// Status of a service on one node as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Whether the service runs on the node.
    pub enabled: bool,
    pub state: ServiceState,
    /// Service specific detail.
    pub extra: Option<Bytes>,
}

/// Controller side of a service plugin.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait ServiceController: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn version(&self) -> Version;

    async fn init(&self, api: ControllerApi) -> Result<(), ServiceError>;

    /// Fallback config of the service.
    fn default_config(&self) -> Bytes {
        Bytes::new()
    }

    /// A message sent by the service's node side.
    async fn handle_message_from_service_node(
        &self,
        node: &NodeId,
        payload: Bytes,
    ) -> Result<(), ServiceError>;

    /// Operator commands. Available before `init`.
    fn cli_commands(&self) -> Vec<CliCommand> {
        Vec::new()
    }

    /// Keys the service shares with other services.
    fn shared_data(&self) -> SharedDataDescriptor {
        SharedDataDescriptor::default()
    }

    /// Service specific status detail of `node`.
    fn status_extra(&self, _node: &NodeId) -> Option<Bytes> {
        None
    }

    async fn finish(&self);
}

/// Framework access handed to a [`ServiceController`] on `init`, scoped to
/// that service.
#[derive(Debug, Clone)]
pub struct ControllerApi {
    service: ServiceName,
    pub(crate) topology: Arc<Topology>,
    pub(crate) state: Arc<StateTracker>,
    pub(crate) resolver: Arc<ConfigResolver>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) metadata: Arc<MetadataStore>,
}

impl ControllerApi {
    pub(crate) fn new(
        service: ServiceName,
        topology: Arc<Topology>,
        state: Arc<StateTracker>,
        resolver: Arc<ConfigResolver>,
        dispatcher: Dispatcher,
        metadata: Arc<MetadataStore>,
    ) -> Self {
        Self {
            service,
            topology,
            state,
            resolver,
            dispatcher,
            metadata,
        }
    }

    pub fn service(&self) -> &ServiceName {
        &self.service
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn node(&self, id: &str) -> Result<Node, ControllerError> {
        Ok(self.topology.get_node_by_id(id)?)
    }

    pub fn service_state(&self, node: &str) -> ServiceState {
        self.state.service_state(node, self.service.as_str())
    }

    pub fn effective_config(&self, node: &str) -> Result<EffectiveConfig, ControllerError> {
        Ok(self.resolver.resolve(node, self.service.as_str())?)
    }

    pub async fn set_config_of_node(&self, node: &str, config: Bytes) -> Result<(), ControllerError> {
        Ok(self
            .resolver
            .set_config_of_node(node, self.service.as_str(), config)
            .await?)
    }

    pub async fn set_config_of_network(&self, network: &str, config: Bytes) -> Result<(), ControllerError> {
        Ok(self
            .resolver
            .set_config_of_network(network, self.service.as_str(), config)
            .await?)
    }

    /// Dispatch a command for this service.
    pub fn dispatch<I, T>(
        &self,
        scope: ServiceScope,
        targets: I,
        command: ServiceCommand,
    ) -> Result<DispatchHandle, ControllerError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let request = DispatchRequest::new(scope, targets, self.service.clone(), command);
        Ok(self.dispatcher.dispatch(request)?)
    }

    pub fn metadata(&self, layer: MetadataLayer, id: &str, file: &str) -> Option<Bytes> {
        self.metadata
            .get(&MetadataKey::new(layer, id, self.service.clone(), file))
    }

    pub fn set_metadata(
        &self,
        layer: MetadataLayer,
        id: &str,
        file: &str,
        content: Bytes,
    ) -> Result<(), ControllerError> {
        check_record(&self.topology, layer, id)?;
        self.metadata
            .set(MetadataKey::new(layer, id, self.service.clone(), file), content);
        Ok(())
    }
}
