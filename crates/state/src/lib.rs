//! Node and service state tracking.
//!
//! The [`StateTracker`] is the single writer of `node_state` and per-service
//! `service_state`. Its inputs are heartbeats and the liveness sweep,
//! dispatch outcomes, runtime error reports and operator transitions. Every
//! change is mirrored into the topology and published on the state-change
//! stream.

mod error;
mod events;
mod metrics;
mod tracker;

pub use error::StateError;
pub use events::StateChangeStream;
pub use tracker::{LivenessConfig, StateTracker};
