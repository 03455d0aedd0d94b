//! Records and identifiers shared by every control-plane component.
//!
//! - [`schema`]: versioned enums (node/service state, scopes, tiers)
//! - [`Network`], [`Node`], [`NodeGroup`] and links: topology records
//! - [`NodeStateChange`]: item type of the state-change stream
//! - [`Pagination`]: `(page, num)` listing contract

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod event;
mod group;
mod ids;
mod link;
mod network;
mod node;
mod page;

pub mod schema;

pub use event::{NodeStateChange, unix_millis, unix_seconds};
pub use group::NodeGroup;
pub use ids::{GroupId, LinkId, NetworkId, NodeId, ServiceName};
pub use link::{ExternalLink, Link, NetworkLink, NetworkLinkEndpoint, NodeLink, NodeLinkEndpoint};
pub use network::{Coordinates, Location, Network};
pub use node::{DeviceInfo, DeviceParams, Interface, Ipmi, Management, Node, NodeInfo, ServiceInfo};
pub use page::{InvalidPagination, Pagination};
pub use schema::{
    LocationTier, NetIfType, NodeState, NodeType, SCHEMA_VERSION, SchemaError, ServiceConfigSource,
    ServiceScope, ServiceState,
};

/// Re-export so dependents name payload bytes consistently.
pub use bytes::Bytes;
