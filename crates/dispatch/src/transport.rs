use std::fmt::Debug;

use async_trait::async_trait;
use auto_impl::auto_impl;
use strata_primitives::NodeId;

use crate::command::{CommandResponse, NodeCommand};
use crate::error::TransportError;

/// Delivery of commands to the service agent of a node.
///
/// One call is one attempt. Implementations need not bound the call in
/// time: the dispatcher applies its own per-attempt timeout.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait NodeTransport: Send + Sync + Debug {
    async fn send_command(
        &self,
        node: &NodeId,
        service: &str,
        command: NodeCommand,
    ) -> Result<CommandResponse, TransportError>;
}
