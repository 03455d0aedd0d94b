//! Commands, requests and outcomes.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strata_primitives::{NodeId, ServiceName, ServiceScope};

use crate::error::FrameworkError;

/// Lifecycle command addressed to a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ServiceCommand {
    /// Start the service. Without an explicit config each node gets its
    /// effective config.
    Start { config: Option<Bytes> },
    Stop,
    /// Stop, finish and re-initialise the service.
    Reset,
    /// Service specific operation.
    ApplyOps { op_cmd: String, op_params: String },
}

impl ServiceCommand {
    pub fn start() -> Self {
        Self::Start { config: None }
    }

    pub fn start_with(config: impl Into<Bytes>) -> Self {
        Self::Start {
            config: Some(config.into()),
        }
    }

    pub fn apply_ops(op_cmd: impl Into<String>, op_params: impl Into<String>) -> Self {
        Self::ApplyOps {
            op_cmd: op_cmd.into(),
            op_params: op_params.into(),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Start { .. } => CommandKind::Start,
            Self::Stop => CommandKind::Stop,
            Self::Reset => CommandKind::Reset,
            Self::ApplyOps { .. } => CommandKind::ApplyOps,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CommandKind {
    Start,
    Stop,
    Reset,
    ApplyOps,
}

impl CommandKind {
    /// Total attempts allowed for this command.
    pub fn max_attempts(self, configured: u32) -> u32 {
        match self {
            Self::Stop => 1,
            _ => configured.max(1),
        }
    }
}

/// Command as delivered to one node, with its config already resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum NodeCommand {
    Start { config: Bytes },
    Stop,
    Reset,
    ApplyOps { op_cmd: String, op_params: String },
}

impl NodeCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Start { .. } => CommandKind::Start,
            Self::Stop => CommandKind::Stop,
            Self::Reset => CommandKind::Reset,
            Self::ApplyOps { .. } => CommandKind::ApplyOps,
        }
    }
}

/// Successful reply of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Free-form payload, e.g. the output of an operation.
    pub payload: Bytes,
}

impl CommandResponse {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// A command for `service` on every node selected by `scope` and `targets`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub scope: ServiceScope,
    pub targets: Vec<String>,
    pub service: ServiceName,
    pub command: ServiceCommand,
}

impl DispatchRequest {
    pub fn new<I, T>(scope: ServiceScope, targets: I, service: impl Into<ServiceName>, command: ServiceCommand) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            scope,
            targets: targets.into_iter().map(Into::into).collect(),
            service: service.into(),
            command,
        }
    }

    pub fn to_nodes<I, T>(nodes: I, service: impl Into<ServiceName>, command: ServiceCommand) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::new(ServiceScope::Node, nodes, service, command)
    }
}

/// Result of a command on one node.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub node_id: NodeId,
    pub service: ServiceName,
    pub command: CommandKind,
    /// Attempts sent to the node. Zero when the node was rejected up front.
    pub attempts: u32,
    pub elapsed: Duration,
    pub result: Result<CommandResponse, FrameworkError>,
}

impl DispatchOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}
