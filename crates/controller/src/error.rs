use strata_dispatch::{DispatchError, ServiceError};
use strata_primitives::ServiceName;
use strata_resolver::ResolverError;
use strata_state::StateError;
use strata_topology::TopologyError;
use strata_version::VersionError;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("service not registered: {0}")]
    ServiceNotRegistered(ServiceName),
    #[error("service already registered: {0}")]
    ServiceAlreadyRegistered(ServiceName),
    #[error("service {service} failed to initialise: {source}")]
    ServiceInit {
        service: ServiceName,
        #[source]
        source: ServiceError,
    },
    #[error("service {service} rejected the message: {source}")]
    ServiceMessage {
        service: ServiceName,
        #[source]
        source: ServiceError,
    },
    #[error("metadata not found: {0}")]
    MetadataNotFound(String),
    #[error("controller is shut down")]
    ShutDown,
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
