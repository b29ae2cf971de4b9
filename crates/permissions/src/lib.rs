//! Hierarchical permission resolution.
//!
//! Permissions come in two kinds: a [`Patent`] is a single capability tied to
//! an application feature, and a [`Family`] groups patents and other families
//! to any depth. Users receive families and patents directly; what they can
//! actually do is the flattened, deduplicated set of patents reachable from
//! those assignments.
//!
//! # Core Concepts
//!
//! - [`Hierarchy`]: a snapshot arena holding every node once, linked by id.
//!   Attach and detach go through [`Hierarchy::attach_child`] and
//!   [`Hierarchy::detach_child`], which keep the family graph acyclic.
//! - [`cycle`]: pure graph checks (`would_create_cycle`, `is_ancestor`,
//!   `find_cycle`) over any [`FamilyGraph`].
//! - [`Resolver`]: computes effective permissions for a [`Principal`].
//! - [`HierarchyStore`]: the persistence boundary, with version-token
//!   optimistic concurrency.
//!
//! # Example
//!
//! ```
//! use permissions::{Family, Hierarchy, NodeId, Patent, Principal, Resolver, User};
//!
//! let mut hierarchy = Hierarchy::new();
//! hierarchy.insert(Patent::new("create_invoice", "Create invoice")?);
//! hierarchy.insert(Family::new("sales", "Sales")?);
//! hierarchy.attach_child(&NodeId::from("sales"), &NodeId::from("create_invoice"))?;
//!
//! let mut user = User::new("u1", "Alice")?;
//! user.assign_family(NodeId::from("sales"));
//!
//! let resolver = Resolver::new(&hierarchy);
//! assert!(resolver.contains_patent(Principal::User(&user), &NodeId::from("create_invoice")));
//! # Ok::<(), permissions::Error>(())
//! ```

pub mod cycle;
mod error;
mod hierarchy;
mod node;
mod resolver;
mod store;
mod user;

pub use cycle::FamilyGraph;
pub use error::{Error, Result};
pub use hierarchy::Hierarchy;
pub use node::{Family, NodeId, Patent, PermissionNode, Version};
pub use resolver::{Principal, Resolution, Resolver};
pub use store::{HIERARCHY, HierarchyStore, StoreError, StoreResult};
pub use user::{User, UserId};
