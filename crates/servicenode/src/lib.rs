//! Node-side service hosting.
//!
//! A [`NodeAgent`] hosts the [`NodeService`] plugins installed on one node
//! and executes the lifecycle commands the controller dispatches to it.
//! [`LocalTransport`] connects a dispatcher to agents in the same process.

mod agent;
mod handle;
mod service;
mod transport;
mod upcall;

pub use agent::{AgentConfig, NodeAgent};
pub use handle::AgentHandle;
pub use service::{NodeService, ServiceContext};
pub use transport::LocalTransport;
pub use upcall::{Upcall, UpcallError, UpcallReceiver, UpcallSender, upcall_channel};
