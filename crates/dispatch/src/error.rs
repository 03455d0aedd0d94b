use serde::{Deserialize, Serialize};
use strata_primitives::ServiceState;
use strata_topology::{RecordKind, TopologyError};

/// Failure reported by a service on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ServiceError {
    pub message: String,
    /// A fatal error is not retried.
    pub fatal: bool,
}

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

/// Errors of a node transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("node did not answer in time")]
    Timeout,
    #[error("node disconnected: {0}")]
    Disconnected(String),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Per-node failure of a dispatched command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameworkError {
    #[error("service timed out after {attempts} attempts")]
    ServiceTimeout { attempts: u32 },
    #[error("node is disconnected")]
    NodeDisconnected,
    #[error("service is not available on the node")]
    ServiceUnavailable,
    #[error("command not allowed in service state {0}")]
    ServiceStateNotAllowed(ServiceState),
    #[error("another operation holds the node")]
    NodeBusy,
    #[error("cancelled")]
    Cancelled,
    #[error("service error: {0}")]
    Service(ServiceError),
}

/// Errors failing a whole dispatch call.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: String },
    #[error("group {group} does not manage service {service}")]
    ServiceMismatch { group: String, service: String },
    #[error(transparent)]
    Topology(TopologyError),
}

impl From<TopologyError> for DispatchError {
    fn from(err: TopologyError) -> Self {
        match err {
            TopologyError::NotFound { kind, id } => Self::NotFound { kind, id },
            other => Self::Topology(other),
        }
    }
}
