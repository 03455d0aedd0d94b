//! Network records and physical locations.

use serde::{Deserialize, Serialize};

use crate::ids::NetworkId;
use crate::schema::LocationTier;

/// GPS-style coordinates of a location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f32,
    pub longitude: f32,
    pub altitude: f32,
}

/// Physical location of a network or node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub description: String,
    /// Tier this location describes, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<LocationTier>,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

/// A network in the topology tree.
///
/// The store keeps parent links only; `children` is filled in when a tree
/// view is materialised.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub id: NetworkId,
    pub name: String,
    /// Empty for root networks.
    #[serde(default)]
    pub parent_id: NetworkId,
    #[serde(default)]
    pub description: String,
    /// Ordered subsequence of the tier vocabulary.
    #[serde(default)]
    pub tiers: Vec<LocationTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Network>,
}

impl Network {
    /// Create a root network.
    pub fn root(id: impl Into<NetworkId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Create a network under `parent`.
    pub fn child_of(
        id: impl Into<NetworkId>,
        name: impl Into<String>,
        parent: impl Into<NetworkId>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: parent.into(),
            ..Default::default()
        }
    }

    /// Set the tiers covered by this network.
    pub fn with_tiers(mut self, tiers: impl IntoIterator<Item = LocationTier>) -> Self {
        self.tiers = tiers.into_iter().collect();
        self
    }

    /// Returns true if this network has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_empty()
    }

    /// Finest tier of this network, if it declares any.
    pub fn last_tier(&self) -> Option<LocationTier> {
        self.tiers.last().copied()
    }

    /// Coarsest tier of this network, if it declares any.
    pub fn first_tier(&self) -> Option<LocationTier> {
        self.tiers.first().copied()
    }

    /// Depth-first iterator over this network and its materialised children.
    pub fn walk(&self) -> Vec<&Network> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }
}
