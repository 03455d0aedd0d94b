use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use auto_impl::auto_impl;
use bytes::Bytes;
use strata_dispatch::{CommandResponse, ServiceError};
use strata_primitives::{NodeId, ServiceName};
use strata_shared_data::{SharedDataExchange, SharedDataProvider};
use strata_version::Version;

use crate::upcall::{Upcall, UpcallError, UpcallSender};

/// A service plugin hosted on a node.
///
/// Every call runs under the agent's node-side timeout. `init` runs before
/// the first `start` and again on reset.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait NodeService: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn version(&self) -> Version;

    async fn init(&self, ctx: ServiceContext) -> Result<(), ServiceError>;

    /// Start with the cluster-wide config resolved by the controller and
    /// the node's own instance config.
    async fn start(&self, cluster_config: Bytes, instance_config: Bytes) -> Result<(), ServiceError>;

    /// Runtime operation. Does not change the service state.
    async fn apply_ops(&self, op_cmd: &str, op_params: &str) -> Result<CommandResponse, ServiceError>;

    async fn stop(&self) -> Result<(), ServiceError>;

    /// Last call before the service is dropped or re-initialised.
    async fn finish(&self);

    fn shared_data(&self) -> Option<Arc<dyn SharedDataProvider>> {
        None
    }
}

/// What a service gets from its node.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    node_id: NodeId,
    service: ServiceName,
    upcalls: UpcallSender,
    shared_data: Arc<SharedDataExchange>,
}

impl ServiceContext {
    pub(crate) fn new(
        node_id: NodeId,
        service: ServiceName,
        upcalls: UpcallSender,
        shared_data: Arc<SharedDataExchange>,
    ) -> Self {
        Self {
            node_id,
            service,
            upcalls,
            shared_data,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn service(&self) -> &ServiceName {
        &self.service
    }

    /// Shared data of the other services on this node.
    pub fn shared_data(&self) -> &SharedDataExchange {
        &self.shared_data
    }

    pub fn send_message_to_controller(&self, payload: impl Into<Bytes>) -> Result<(), UpcallError> {
        self.upcalls.send(Upcall::Message {
            node_id: self.node_id.clone(),
            service: self.service.clone(),
            payload: payload.into(),
        })
    }

    /// Report a failure of the running service. The controller marks it
    /// malfunctioning.
    pub fn report_error(&self, error: ServiceError) -> Result<(), UpcallError> {
        self.upcalls.send(Upcall::RuntimeError {
            node_id: self.node_id.clone(),
            service: self.service.clone(),
            error,
        })
    }
}
