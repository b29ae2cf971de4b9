//! Permission service: the application-facing API over a hierarchy store.
//!
//! Every call takes a fresh snapshot from the store, runs the pure engine
//! from [`permissions`] over it, and for mutations writes the result back
//! conditioned on the version that was read. Diagnostics the engine reports
//! (cycles already present in stored data, dangling references) are logged
//! here rather than inside the engine.
//!
//! # Example
//!
//! ```ignore
//! use permissions::{NodeId, UserId};
//! use service::PermissionService;
//! use storage::SqliteStore;
//!
//! let service = PermissionService::new(SqliteStore::open("permissions.db")?);
//! service.attach_family_child(&NodeId::from("admin"), &NodeId::from("sales"))?;
//! service.assign_family_to_user(&UserId::from("u1"), &NodeId::from("admin"))?;
//!
//! let granted = service.resolve_effective_permissions(&UserId::from("u1"))?;
//! ```

mod service;

pub use service::PermissionService;
