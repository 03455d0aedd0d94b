//! Scoped command dispatch.
//!
//! A [`DispatchRequest`] names a scope (node, node group, network, network
//! with subnetworks), a set of targets, a service and a command. The
//! [`Dispatcher`] expands it into distinct nodes and runs one task per node,
//! each holding the `node/<id>` lock for the whole operation. Every attempt
//! is bounded by [`DispatchConfig::timeout`]; `Start`, `Reset` and
//! `ApplyOps` are retried with the same payload, `Stop` never is.
//!
//! Outcomes arrive on the returned [`DispatchHandle`] in completion order,
//! one per node. Service states move as follows:
//!
//! | command  | on dispatch     | on ack        | retries exhausted |
//! |----------|-----------------|---------------|-------------------|
//! | Start    | `Configuring`   | `Running`     | `Malfunctioning`  |
//! | Stop     |                 | `Initialized` | unchanged         |
//! | Reset    | `Uninitialized` | `Initialized` | `Malfunctioning`  |
//! | ApplyOps |                 |               | `Malfunctioning`  |

mod command;
mod dispatcher;
mod error;
mod metrics;
mod scope;
mod transport;

pub use command::{
    CommandKind, CommandResponse, DispatchOutcome, DispatchRequest, NodeCommand, ServiceCommand,
};
pub use dispatcher::{DispatchConfig, DispatchHandle, Dispatcher};
pub use error::{DispatchError, FrameworkError, ServiceError, TransportError};
pub use scope::expand_scope;
pub use transport::NodeTransport;
