//! Permission nodes: individual patents and the families that group them.

use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Identifier shared by patents and families.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Mint a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque concurrency token issued by the store on every persisted mutation.
///
/// The engine only compares versions for equality; it never creates or
/// interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) fn validate_name(name: impl Into<String>) -> Result<String> {
    let name = name.into();
    if name.trim().is_empty() {
        return Err(Error::InvalidName);
    }
    Ok(name)
}

/// An atomic permission gating one application feature.
///
/// Equality and hashing consider the id only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "PatentRecord")]
pub struct Patent {
    pub id: NodeId,
    name: String,
    /// The view or action identifier this patent unlocks.
    pub view_ref: Option<String>,
    pub version: Option<Version>,
}

/// Unvalidated wire form of a [`Patent`].
#[derive(Deserialize)]
struct PatentRecord {
    id: NodeId,
    name: String,
    #[serde(default)]
    view_ref: Option<String>,
    #[serde(default)]
    version: Option<Version>,
}

impl TryFrom<PatentRecord> for Patent {
    type Error = Error;

    fn try_from(record: PatentRecord) -> Result<Self> {
        Ok(Self {
            id: record.id,
            name: validate_name(record.name)?,
            view_ref: record.view_ref,
            version: record.version,
        })
    }
}

impl Patent {
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            name: validate_name(name)?,
            view_ref: None,
            version: None,
        })
    }

    pub fn with_view(mut self, view_ref: impl Into<String>) -> Self {
        self.view_ref = Some(view_ref.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: impl Into<String>) -> Result<()> {
        self.name = validate_name(name)?;
        Ok(())
    }
}

impl PartialEq for Patent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Patent {}

impl Hash for Patent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// A named group of patents and nested families.
///
/// Children are held by id. Whether a child is a patent or a family is
/// answered by the [`Hierarchy`](crate::Hierarchy) the family lives in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FamilyRecord")]
pub struct Family {
    pub id: NodeId,
    name: String,
    children: BTreeSet<NodeId>,
    pub version: Option<Version>,
}

#[derive(Deserialize)]
struct FamilyRecord {
    id: NodeId,
    name: String,
    #[serde(default)]
    children: BTreeSet<NodeId>,
    #[serde(default)]
    version: Option<Version>,
}

impl TryFrom<FamilyRecord> for Family {
    type Error = Error;

    fn try_from(record: FamilyRecord) -> Result<Self> {
        Family::from_parts(record.id, record.name, record.children, record.version)
    }
}

impl Family {
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            name: validate_name(name)?,
            children: BTreeSet::new(),
            version: None,
        })
    }

    /// Rebuild a family exactly as persisted.
    ///
    /// Children are taken as-is; structural checks are the caller's concern.
    pub fn from_parts(
        id: NodeId,
        name: impl Into<String>,
        children: impl IntoIterator<Item = NodeId>,
        version: Option<Version>,
    ) -> Result<Self> {
        Ok(Self {
            id,
            name: validate_name(name)?,
            children: children.into_iter().collect(),
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

    pub fn children(&self) -> &BTreeSet<NodeId> {
        &self.children
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.children.contains(id)
    }

    /// Insert a child edge without any structural validation.
    ///
    /// Returns `false` if the child was already present. Use
    /// [`Hierarchy::attach_child`](crate::Hierarchy::attach_child) for the
    /// checked operation.
    pub(crate) fn insert_child(&mut self, id: NodeId) -> bool {
        self.children.insert(id)
    }

    pub(crate) fn remove_child(&mut self, id: &NodeId) -> bool {
        self.children.remove(id)
    }
}

/// Either kind of node in the permission tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PermissionNode {
    Patent(Patent),
    Family(Family),
}

impl PermissionNode {
    pub fn id(&self) -> &NodeId {
        match self {
            PermissionNode::Patent(patent) => &patent.id,
            PermissionNode::Family(family) => &family.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PermissionNode::Patent(patent) => patent.name(),
            PermissionNode::Family(family) => family.name(),
        }
    }

    pub fn version(&self) -> Option<&Version> {
        match self {
            PermissionNode::Patent(patent) => patent.version.as_ref(),
            PermissionNode::Family(family) => family.version.as_ref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PermissionNode::Patent(_) => "patent",
            PermissionNode::Family(_) => "family",
        }
    }

    pub fn as_family(&self) -> Option<&Family> {
        match self {
            PermissionNode::Family(family) => Some(family),
            PermissionNode::Patent(_) => None,
        }
    }

    pub fn as_patent(&self) -> Option<&Patent> {
        match self {
            PermissionNode::Patent(patent) => Some(patent),
            PermissionNode::Family(_) => None,
        }
    }
}

impl From<Patent> for PermissionNode {
    fn from(patent: Patent) -> Self {
        PermissionNode::Patent(patent)
    }
}

impl From<Family> for PermissionNode {
    fn from(family: Family) -> Self {
        PermissionNode::Family(family)
    }
}
