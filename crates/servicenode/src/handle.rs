//! Cloneable handle for commanding a node agent.

use std::collections::BTreeMap;

use strata_dispatch::{CommandResponse, NodeCommand, TransportError};
use strata_primitives::{NodeId, ServiceName};
use strata_version::Version;
use tokio::sync::{mpsc, oneshot};

use crate::agent::AgentCommand;

const STOPPED: &str = "node agent stopped";

#[derive(Debug, Clone)]
pub struct AgentHandle {
    node_id: NodeId,
    command_tx: mpsc::UnboundedSender<AgentCommand>,
}

impl AgentHandle {
    pub(crate) fn new(node_id: NodeId, command_tx: mpsc::UnboundedSender<AgentCommand>) -> Self {
        Self {
            node_id,
            command_tx,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn is_running(&self) -> bool {
        !self.command_tx.is_closed()
    }

    /// Run `command` on `service`. A stopped agent reports `Disconnected`.
    pub async fn execute(
        &self,
        service: &str,
        command: NodeCommand,
    ) -> Result<CommandResponse, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(AgentCommand::Execute {
                service: service.into(),
                command,
                response_tx: tx,
            })
            .map_err(|_| TransportError::Disconnected(STOPPED.into()))?;

        rx.await
            .map_err(|_| TransportError::Disconnected(STOPPED.into()))?
    }

    /// Versions of the hosted services.
    pub async fn versions(&self) -> Result<BTreeMap<ServiceName, Version>, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(AgentCommand::Versions { response_tx: tx })
            .map_err(|_| TransportError::Disconnected(STOPPED.into()))?;
        rx.await.map_err(|_| TransportError::Disconnected(STOPPED.into()))
    }

    /// Finish every hosted service and stop the agent. Returns once done.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .command_tx
            .send(AgentCommand::Shutdown { done_tx: tx })
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}
