//! Node agent actor (runs in its own tokio task).

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use strata_dispatch::{CommandResponse, NodeCommand, ServiceError, TransportError};
use strata_primitives::{NodeId, ServiceName};
use strata_shared_data::SharedDataExchange;
use strata_version::Version;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::handle::AgentHandle;
use crate::service::{NodeService, ServiceContext};
use crate::upcall::UpcallSender;

/// Node-side limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentConfig {
    /// Bound of each call into a service.
    pub timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
        }
    }
}

/// Commands from the handle to the agent.
pub(crate) enum AgentCommand {
    Execute {
        service: ServiceName,
        command: NodeCommand,
        response_tx: oneshot::Sender<Result<CommandResponse, TransportError>>,
    },
    Versions {
        response_tx: oneshot::Sender<BTreeMap<ServiceName, Version>>,
    },
    Shutdown {
        done_tx: oneshot::Sender<()>,
    },
}

#[derive(Debug)]
struct Hosted {
    service: Arc<dyn NodeService>,
    initialized: bool,
}

/// Hosts the service plugins of one node and runs the commands sent to it,
/// one at a time.
#[derive(Debug)]
pub struct NodeAgent {
    node_id: NodeId,
    /// Node-owned config handed to every `start`.
    instance_config: Bytes,
    config: AgentConfig,
    services: BTreeMap<ServiceName, Hosted>,
    shared_data: Arc<SharedDataExchange>,
    upcalls: UpcallSender,
    command_rx: mpsc::UnboundedReceiver<AgentCommand>,
}

impl NodeAgent {
    /// Create an agent and its handle. Nothing runs until [`Self::run`].
    pub fn new(
        node_id: impl Into<NodeId>,
        instance_config: Bytes,
        config: AgentConfig,
        upcalls: UpcallSender,
    ) -> (Self, AgentHandle) {
        let node_id = node_id.into();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let agent = Self {
            node_id: node_id.clone(),
            instance_config,
            config,
            services: BTreeMap::new(),
            shared_data: Arc::new(SharedDataExchange::new()),
            upcalls,
            command_rx,
        };
        (agent, AgentHandle::new(node_id, command_tx))
    }

    /// Host `service`, registering its shared data provider if it has one.
    pub fn with_service(mut self, service: Arc<dyn NodeService>) -> Self {
        let name = ServiceName::from(service.name());
        if let Some(provider) = service.shared_data() {
            self.shared_data.register(name.clone(), provider);
        }
        self.services.insert(
            name,
            Hosted {
                service,
                initialized: false,
            },
        );
        self
    }

    pub fn shared_data(&self) -> Arc<SharedDataExchange> {
        self.shared_data.clone()
    }

    /// Run the command loop until shut down or every handle is dropped.
    pub async fn run(mut self) {
        info!(node = %self.node_id, services = self.services.len(), "node agent started");
        let mut done = None;
        while let Some(command) = self.command_rx.recv().await {
            match command {
                AgentCommand::Execute {
                    service,
                    command,
                    response_tx,
                } => {
                    let result = self.execute(&service, command).await;
                    let _ = response_tx.send(result);
                }
                AgentCommand::Versions { response_tx } => {
                    let versions = self
                        .services
                        .iter()
                        .map(|(name, hosted)| (name.clone(), hosted.service.version()))
                        .collect();
                    let _ = response_tx.send(versions);
                }
                AgentCommand::Shutdown { done_tx } => {
                    done = Some(done_tx);
                    break;
                }
            }
        }

        self.command_rx.close();
        self.finish_all().await;
        debug!(node = %self.node_id, "node agent stopped");
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    async fn execute(
        &mut self,
        service: &ServiceName,
        command: NodeCommand,
    ) -> Result<CommandResponse, TransportError> {
        let limit = self.config.timeout;
        let ctx = ServiceContext::new(
            self.node_id.clone(),
            service.clone(),
            self.upcalls.clone(),
            self.shared_data.clone(),
        );
        let Some(hosted) = self.services.get_mut(service) else {
            return Err(ServiceError::fatal(format!("service {service} is not hosted on this node")).into());
        };
        let plugin = hosted.service.clone();
        debug!(node = %self.node_id, %service, command = %command.kind(), "executing");

        match command {
            NodeCommand::Start { config } => {
                if !hosted.initialized {
                    bounded(limit, plugin.init(ctx)).await?;
                    hosted.initialized = true;
                }
                bounded(limit, plugin.start(config, self.instance_config.clone())).await?;
                Ok(CommandResponse::default())
            }
            NodeCommand::Stop => {
                bounded(limit, plugin.stop()).await?;
                Ok(CommandResponse::default())
            }
            NodeCommand::Reset => {
                if hosted.initialized {
                    if let Err(err) = bounded(limit, plugin.stop()).await {
                        warn!(node = %self.node_id, %service, %err, "stop before reset failed");
                    }
                    let _ = tokio::time::timeout(limit, plugin.finish()).await;
                    hosted.initialized = false;
                }
                bounded(limit, plugin.init(ctx)).await?;
                hosted.initialized = true;
                Ok(CommandResponse::default())
            }
            NodeCommand::ApplyOps { op_cmd, op_params } => {
                bounded(limit, plugin.apply_ops(&op_cmd, &op_params)).await
            }
        }
    }

    async fn finish_all(&mut self) {
        for (name, hosted) in &mut self.services {
            if hosted.initialized {
                if tokio::time::timeout(self.config.timeout, hosted.service.finish())
                    .await
                    .is_err()
                {
                    warn!(node = %self.node_id, service = %name, "finish timed out");
                }
                hosted.initialized = false;
            }
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, ServiceError>>,
) -> Result<T, TransportError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(TransportError::from),
        Err(_) => Err(TransportError::Timeout),
    }
}
