//! Principals and their direct assignments.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::node::validate_name;
use crate::{Error, NodeId, Result, Version};

/// Identifier of a user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An authenticated principal.
///
/// Users sit outside the family graph, so assigning to them never needs a
/// cycle check. Effective permissions are never stored here; ask a
/// [`Resolver`](crate::Resolver).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UserRecord")]
pub struct User {
    pub id: UserId,
    name: String,
    direct_families: BTreeSet<NodeId>,
    direct_patents: BTreeSet<NodeId>,
    pub version: Option<Version>,
}

#[derive(Deserialize)]
struct UserRecord {
    id: UserId,
    name: String,
    #[serde(default)]
    direct_families: BTreeSet<NodeId>,
    #[serde(default)]
    direct_patents: BTreeSet<NodeId>,
    #[serde(default)]
    version: Option<Version>,
}

impl TryFrom<UserRecord> for User {
    type Error = Error;

    fn try_from(record: UserRecord) -> Result<Self> {
        User::from_parts(
            record.id,
            record.name,
            record.direct_families,
            record.direct_patents,
            record.version,
        )
    }
}

impl User {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            name: validate_name(name)?,
            direct_families: BTreeSet::new(),
            direct_patents: BTreeSet::new(),
            version: None,
        })
    }

    /// Rebuild a user exactly as persisted.
    pub fn from_parts(
        id: UserId,
        name: impl Into<String>,
        direct_families: impl IntoIterator<Item = NodeId>,
        direct_patents: impl IntoIterator<Item = NodeId>,
        version: Option<Version>,
    ) -> Result<Self> {
        Ok(Self {
            id,
            name: validate_name(name)?,
            direct_families: direct_families.into_iter().collect(),
            direct_patents: direct_patents.into_iter().collect(),
            version,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: impl Into<String>) -> Result<()> {
        self.name = validate_name(name)?;
        Ok(())
    }

    pub fn direct_families(&self) -> &BTreeSet<NodeId> {
        &self.direct_families
    }

    pub fn direct_patents(&self) -> &BTreeSet<NodeId> {
        &self.direct_patents
    }

    /// Returns `false` if the family was already assigned.
    pub fn assign_family(&mut self, family: NodeId) -> bool {
        self.direct_families.insert(family)
    }

    /// Returns `false` if the patent was already assigned.
    pub fn assign_patent(&mut self, patent: NodeId) -> bool {
        self.direct_patents.insert(patent)
    }

    pub fn unassign_family(&mut self, family: &NodeId) -> bool {
        self.direct_families.remove(family)
    }

    pub fn unassign_patent(&mut self, patent: &NodeId) -> bool {
        self.direct_patents.remove(patent)
    }

    /// Whether `id` is one of this user's direct assignments.
    pub fn holds(&self, id: &NodeId) -> bool {
        self.direct_families.contains(id) || self.direct_patents.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_are_idempotent() {
        let mut user = User::new("U1", "Alice").unwrap();

        assert!(user.assign_family(NodeId::from("Sales")));
        assert!(!user.assign_family(NodeId::from("Sales")));
        assert!(user.assign_patent(NodeId::from("Login")));
        assert!(!user.assign_patent(NodeId::from("Login")));
        assert_eq!(user.direct_families().len(), 1);
        assert_eq!(user.direct_patents().len(), 1);

        assert!(user.unassign_patent(&NodeId::from("Login")));
        assert!(!user.unassign_patent(&NodeId::from("Login")));
        assert!(!user.unassign_family(&NodeId::from("Admin")));
        assert!(user.holds(&NodeId::from("Sales")));
        assert!(!user.holds(&NodeId::from("Login")));
    }

    #[test]
    fn deserialize_validates_name() {
        let user: User = serde_json::from_str(r#"{"id": "U1", "name": "Alice", "direct_patents": ["Login"]}"#).unwrap();
        assert!(user.direct_patents().contains(&NodeId::from("Login")));
        assert!(user.direct_families().is_empty());

        assert!(serde_json::from_str::<User>(r#"{"id": "U1", "name": ""}"#).is_err());
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(UserId::new(), UserId::new());
    }
}
