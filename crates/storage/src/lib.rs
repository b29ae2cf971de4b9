//! SQLite-backed storage for the permission hierarchy.
//!
//! This crate persists patents, families, and users, and implements
//! [`permissions::HierarchyStore`] on top of SQLite.
//!
//! # Optimistic Concurrency
//!
//! Every record carries an opaque version token (a fresh UUID on each write).
//! Saves are conditioned on the token the caller read: if another writer
//! committed first, the save fails with [`Error::Conflict`] and nothing is
//! written. A missing record fails with [`Error::NotFound`] instead, so the
//! two cases stay distinguishable.
//!
//! Family saves also carry the hierarchy revision read before the edit. Any
//! structural commit (creating or saving a family, deleting any node) replaces it, so
//! a save planned against an outdated graph fails with [`Error::Conflict`].
//!
//! # Example
//!
//! ```no_run
//! use permissions::{Family, NodeId, Patent};
//! use storage::SqliteStore;
//!
//! let store = SqliteStore::open("permissions.db")?;
//! store.create_patent(&Patent::new("create_invoice", "Create invoice")?)?;
//! store.create_family(&Family::new("sales", "Sales")?)?;
//!
//! let mut sales = store.load_family(&NodeId::from("sales"))?;
//! sales.rename("Sales team")?;
//! store.save_family(&sales, &store.revision()?)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod error;
mod store;

pub use error::{Error, Result};
pub use store::{NodeSummary, SqliteStore};
