//! Controller composition.
//!
//! [`Controller`] owns the topology, the state tracker, the config resolver
//! and the dispatcher, and keeps the registry of [`ServiceController`]
//! plugins. Plugins are version checked against the configured
//! compatibility range before they load, and again for every node that
//! installs them.
//!
//! Node upcalls ([`strata_servicenode::Upcall`]) are routed either to the
//! owning plugin or, for runtime errors, to the state tracker.

mod config;
mod controller;
mod error;
mod logging;
mod metadata;
mod service;

pub use config::{
    CompatibilitySection, ConfigError, ControllerConfig, DispatchSection, LivenessSection,
    LockSection, LoggingSection, MAX_DISPATCH_TIMEOUT_SECS, MIN_DISPATCH_TIMEOUT_SECS,
    StorageSection,
};
pub use controller::Controller;
pub use error::ControllerError;
pub use logging::{LogSettings, LoggingError, init_logging};
pub use metadata::{MetadataKey, MetadataLayer};
pub use service::{CliCommand, ControllerApi, ServiceController, ServiceStatus};
