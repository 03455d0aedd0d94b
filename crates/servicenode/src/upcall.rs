//! Node to controller messages.

use bytes::Bytes;
use strata_dispatch::ServiceError;
use strata_primitives::{NodeId, ServiceName};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upcall {
    /// Service specific message for the service's controller side.
    Message {
        node_id: NodeId,
        service: ServiceName,
        payload: Bytes,
    },
    /// The running service failed.
    RuntimeError {
        node_id: NodeId,
        service: ServiceName,
        error: ServiceError,
    },
}

impl Upcall {
    pub fn node_id(&self) -> &NodeId {
        match self {
            Self::Message { node_id, .. } | Self::RuntimeError { node_id, .. } => node_id,
        }
    }

    pub fn service(&self) -> &ServiceName {
        match self {
            Self::Message { service, .. } | Self::RuntimeError { service, .. } => service,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("controller is not receiving upcalls")]
pub struct UpcallError;

/// Sending half of the upcall channel, shared by every agent of a process.
#[derive(Debug, Clone)]
pub struct UpcallSender(mpsc::UnboundedSender<Upcall>);

impl UpcallSender {
    pub fn send(&self, upcall: Upcall) -> Result<(), UpcallError> {
        self.0.send(upcall).map_err(|_| UpcallError)
    }
}

pub type UpcallReceiver = mpsc::UnboundedReceiver<Upcall>;

/// Unbounded upcall channel. Upcalls are dropped once the receiver is gone.
pub fn upcall_channel() -> (UpcallSender, UpcallReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UpcallSender(tx), rx)
}
