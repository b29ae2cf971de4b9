//! Permission error types.

use thiserror::Error;

use crate::{NodeId, StoreError};

/// Permission errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A referenced node or user does not exist in the snapshot or store.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A node was offered as its own child.
    #[error("node {0} cannot contain itself")]
    SelfReference(NodeId),

    /// Attaching `child` under `parent` would make an ancestor also a descendant.
    #[error("attaching {child} under {parent} would create a cycle")]
    CycleDetected { parent: NodeId, child: NodeId },

    /// A write was attempted with a stale version token.
    ///
    /// The caller should reload the node and retry.
    #[error("{id} was modified concurrently; reload and retry")]
    ConcurrencyConflict { id: String },

    /// The stored hierarchy is already malformed (e.g. contains a cycle).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Names must contain at least one non-whitespace character.
    #[error("name must not be empty")]
    InvalidName,

    /// Only Families can hold children.
    #[error("node {0} is a patent and cannot hold children")]
    NotAFamily(NodeId),

    /// A store failure that is neither a conflict nor a missing record.
    #[error("store error: {0}")]
    Store(String),
}

impl Error {
    pub(crate) fn node_not_found(id: &NodeId) -> Self {
        Error::NotFound {
            kind: "node",
            id: id.to_string(),
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => Error::NotFound { kind, id },
            StoreError::Conflict { id } => Error::ConcurrencyConflict { id },
            other => Error::Store(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
