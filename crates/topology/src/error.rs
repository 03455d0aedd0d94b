use strata_lock::LockError;
use strata_primitives::InvalidPagination;

use crate::store::PersistenceError;

/// Kind of record named in a [`TopologyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RecordKind {
    Network,
    Node,
    NodeGroup,
    Link,
    Service,
}

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: String },
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: RecordKind, id: String },
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
    #[error(transparent)]
    InvalidPagination(#[from] InvalidPagination),
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl TopologyError {
    pub(crate) fn not_found(kind: RecordKind, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn exists(kind: RecordKind, id: impl ToString) -> Self {
        Self::AlreadyExists {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidTopology(reason.into())
    }

    /// Returns true for `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
