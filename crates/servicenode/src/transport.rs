use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use strata_dispatch::{CommandResponse, NodeCommand, NodeTransport, TransportError};
use strata_primitives::NodeId;
use tracing::debug;

use crate::handle::AgentHandle;

/// [`NodeTransport`] over agents running in this process.
#[derive(Debug, Default)]
pub struct LocalTransport {
    agents: RwLock<HashMap<NodeId, AgentHandle>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route commands for the handle's node to it, replacing any previous agent.
    pub fn attach(&self, agent: AgentHandle) {
        debug!(node = %agent.node_id(), "agent attached");
        self.agents.write().insert(agent.node_id().clone(), agent);
    }

    pub fn detach(&self, node: &str) -> Option<AgentHandle> {
        self.agents.write().remove(node)
    }

    pub fn agent(&self, node: &str) -> Option<AgentHandle> {
        self.agents.read().get(node).cloned()
    }

    pub fn agents(&self) -> Vec<AgentHandle> {
        self.agents.read().values().cloned().collect()
    }
}

#[async_trait]
impl NodeTransport for LocalTransport {
    async fn send_command(
        &self,
        node: &NodeId,
        service: &str,
        command: NodeCommand,
    ) -> Result<CommandResponse, TransportError> {
        let agent = self
            .agent(node.as_str())
            .ok_or_else(|| TransportError::Disconnected(format!("no agent for node {node}")))?;
        agent.execute(service, command).await
    }
}
