//! The persistence boundary the engine consumes.

use thiserror::Error;

use crate::{Family, Hierarchy, NodeId, Patent, User, UserId, Version};

/// Failures a [`HierarchyStore`] must keep distinguishable.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The version carried by the write is no longer current.
    #[error("version conflict on {id}")]
    Conflict { id: String },

    /// The record is still referenced and cannot be deleted.
    #[error("{id} is still in use")]
    InUse { id: String },

    /// A record with this id already exists.
    #[error("{id} already exists")]
    AlreadyExists { id: String },

    /// Anything else the backend reports.
    #[error("{0}")]
    Backend(String),
}

/// Conflict id reported when the hierarchy revision is stale.
pub const HIERARCHY: &str = "hierarchy";

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Loads and conditionally saves permission data.
///
/// Every `save_*` call is conditioned on the `version` carried by the value:
/// it must equal the stored version or the write fails with
/// [`StoreError::Conflict`]. A successful write returns the new version.
/// Only the first writer holding a given version can win.
///
/// Family writes are additionally conditioned on the hierarchy revision, a
/// single token that changes on every structural commit. A cycle check made
/// against a snapshot therefore only stands if no other family changed since.
pub trait HierarchyStore {
    /// Load every patent and family, each with its current version, along
    /// with the hierarchy revision.
    fn snapshot(&self) -> StoreResult<Hierarchy>;

    fn load_patent(&self, id: &NodeId) -> StoreResult<Patent>;

    fn load_family(&self, id: &NodeId) -> StoreResult<Family>;

    fn load_user(&self, id: &UserId) -> StoreResult<User>;

    fn list_users(&self) -> StoreResult<Vec<User>>;

    fn save_patent(&self, patent: &Patent) -> StoreResult<Version>;

    /// Save a family if both its version and `revision` are still current.
    ///
    /// A stale revision fails with [`StoreError::Conflict`] carrying
    /// [`HIERARCHY`] as the id.
    fn save_family(&self, family: &Family, revision: &Version) -> StoreResult<Version>;

    fn save_user(&self, user: &User) -> StoreResult<Version>;
}
