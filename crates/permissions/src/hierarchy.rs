//! The hierarchy snapshot: every node stored once, linked by id.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::cycle::{self, FamilyGraph};
use crate::{Error, Family, NodeId, Patent, PermissionNode, Result, User, UserId, Version};

/// An arena of permission nodes keyed by id.
///
/// A `Hierarchy` is a point-in-time snapshot. Edits made here are in memory
/// only; persisting them is the store's job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hierarchy {
    nodes: HashMap<NodeId, PermissionNode>,
    /// Store-issued token for the family structure as a whole.
    #[serde(default)]
    revision: Option<Version>,
}

impl Hierarchy {
    /// An empty snapshot, also used when no snapshot could be obtained.
    pub fn new() -> Self {
        Self::default()
    }

    /// The structural revision this snapshot was read at, if the store
    /// issued one.
    pub fn revision(&self) -> Option<&Version> {
        self.revision.as_ref()
    }

    pub fn set_revision(&mut self, revision: Version) {
        self.revision = Some(revision);
    }

    /// Add or replace a node.
    pub fn insert(&mut self, node: impl Into<PermissionNode>) -> Option<PermissionNode> {
        let node = node.into();
        self.nodes.insert(node.id().clone(), node)
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<PermissionNode> {
        self.nodes.remove(id)
    }

    pub fn get(&self, id: &NodeId) -> Option<&PermissionNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PermissionNode> {
        self.nodes.values()
    }

    pub fn patent(&self, id: &NodeId) -> Option<&Patent> {
        self.get(id).and_then(PermissionNode::as_patent)
    }

    pub fn family(&self, id: &NodeId) -> Option<&Family> {
        self.get(id).and_then(PermissionNode::as_family)
    }

    /// Look up a family, failing with `NotFound` or `NotAFamily`.
    pub fn require_family(&self, id: &NodeId) -> Result<&Family> {
        match self.get(id) {
            Some(PermissionNode::Family(family)) => Ok(family),
            Some(PermissionNode::Patent(_)) => Err(Error::NotAFamily(id.clone())),
            None => Err(Error::node_not_found(id)),
        }
    }

    fn require_family_mut(&mut self, id: &NodeId) -> Result<&mut Family> {
        match self.nodes.get_mut(id) {
            Some(PermissionNode::Family(family)) => Ok(family),
            Some(PermissionNode::Patent(_)) => Err(Error::NotAFamily(id.clone())),
            None => Err(Error::node_not_found(id)),
        }
    }

    /// Attach `child` under `parent`.
    ///
    /// Returns `Ok(false)` when the edge already exists. Fails with
    /// `SelfReference` or `CycleDetected` without touching the hierarchy.
    pub fn attach_child(&mut self, parent: &NodeId, child: &NodeId) -> Result<bool> {
        if parent == child {
            return Err(Error::SelfReference(parent.clone()));
        }
        let parent_family = self.require_family(parent)?;
        if parent_family.contains(child) {
            return Ok(false);
        }

        match self.get(child) {
            None => return Err(Error::node_not_found(child)),
            Some(PermissionNode::Family(_)) => {
                if cycle::would_create_cycle(parent, child, self) {
                    return Err(Error::CycleDetected {
                        parent: parent.clone(),
                        child: child.clone(),
                    });
                }
            }
            Some(PermissionNode::Patent(_)) => {}
        }

        Ok(self.require_family_mut(parent)?.insert_child(child.clone()))
    }

    /// Remove `child` from `parent`. Returns `Ok(false)` if it was not there.
    pub fn detach_child(&mut self, parent: &NodeId, child: &NodeId) -> Result<bool> {
        Ok(self.require_family_mut(parent)?.remove_child(child))
    }

    /// Families holding `id` as an immediate child.
    pub fn parents_of(&self, id: &NodeId) -> Vec<&Family> {
        self.nodes
            .values()
            .filter_map(PermissionNode::as_family)
            .filter(|family| family.contains(id))
            .collect()
    }

    /// Users holding `id` as a direct assignment.
    pub fn users_holding<'u>(&self, id: &NodeId, users: &'u [User]) -> Vec<&'u UserId> {
        users
            .iter()
            .filter(|user| user.holds(id))
            .map(|user| &user.id)
            .collect()
    }

    /// Whether anything still references `id`; such a node must not be
    /// deleted without cascading.
    pub fn is_in_use(&self, id: &NodeId, users: &[User]) -> bool {
        !self.parents_of(id).is_empty() || users.iter().any(|user| user.holds(id))
    }

    /// One cycle among families, if the snapshot is malformed.
    pub fn find_cycle(&self) -> Option<Vec<NodeId>> {
        cycle::find_cycle(self)
    }
}

impl FamilyGraph for Hierarchy {
    fn children_of(&self, id: &NodeId) -> Option<&BTreeSet<NodeId>> {
        self.family(id).map(Family::children)
    }

    fn family_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes
            .values()
            .filter_map(PermissionNode::as_family)
            .map(|family| &family.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NodeId {
        NodeId::from(s)
    }

    /// Admin -> { Sales, ManageUsers }, Sales -> { CreateInvoice, ViewClients }
    fn sample() -> Hierarchy {
        let mut h = Hierarchy::new();
        for patent in ["CreateInvoice", "ViewClients", "ManageUsers"] {
            h.insert(Patent::new(patent, patent).unwrap());
        }
        h.insert(Family::new("Sales", "Sales").unwrap());
        h.insert(Family::new("Admin", "Admin").unwrap());
        h.attach_child(&id("Sales"), &id("CreateInvoice")).unwrap();
        h.attach_child(&id("Sales"), &id("ViewClients")).unwrap();
        h.attach_child(&id("Admin"), &id("Sales")).unwrap();
        h.attach_child(&id("Admin"), &id("ManageUsers")).unwrap();
        h
    }

    #[test]
    fn attach_is_idempotent() {
        let mut h = sample();
        let before = h.family(&id("Sales")).unwrap().clone();

        assert!(!h.attach_child(&id("Sales"), &id("CreateInvoice")).unwrap());
        assert_eq!(h.family(&id("Sales")).unwrap(), &before);
    }

    #[test]
    fn detach_missing_is_noop() {
        let mut h = sample();

        assert!(h.detach_child(&id("Sales"), &id("ViewClients")).unwrap());
        assert!(!h.detach_child(&id("Sales"), &id("ViewClients")).unwrap());
        assert!(!h.detach_child(&id("Sales"), &id("Nope")).unwrap());
        assert_eq!(h.family(&id("Sales")).unwrap().children().len(), 1);
    }

    #[test]
    fn self_reference_rejected() {
        let mut h = sample();
        for family in ["Sales", "Admin"] {
            let err = h.attach_child(&id(family), &id(family)).unwrap_err();
            assert!(matches!(err, Error::SelfReference(_)));
        }
    }

    #[test]
    fn cycle_rejected_and_structure_unchanged() {
        let mut h = sample();
        h.insert(Family::new("Top", "Top").unwrap());
        h.attach_child(&id("Top"), &id("Admin")).unwrap();
        let sales_before = h.family(&id("Sales")).unwrap().clone();
        let admin_before = h.family(&id("Admin")).unwrap().clone();

        let err = h.attach_child(&id("Sales"), &id("Admin")).unwrap_err();
        assert!(matches!(err, Error::CycleDetected { .. }));

        let err = h.attach_child(&id("Sales"), &id("Top")).unwrap_err();
        assert!(matches!(err, Error::CycleDetected { .. }));

        assert_eq!(h.family(&id("Sales")).unwrap(), &sales_before);
        assert_eq!(h.family(&id("Admin")).unwrap(), &admin_before);
        assert!(h.find_cycle().is_none());
    }

    #[test]
    fn attach_errors() {
        let mut h = sample();

        assert!(matches!(
            h.attach_child(&id("Missing"), &id("Sales")),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            h.attach_child(&id("Sales"), &id("Missing")),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            h.attach_child(&id("ViewClients"), &id("ManageUsers")),
            Err(Error::NotAFamily(_))
        ));
    }

    #[test]
    fn patent_shared_by_two_families() {
        let mut h = sample();
        h.attach_child(&id("Admin"), &id("ViewClients")).unwrap();

        let parents: Vec<_> = h
            .parents_of(&id("ViewClients"))
            .into_iter()
            .map(|f| f.id.as_str())
            .collect();
        assert_eq!(parents.len(), 2);
        assert!(parents.contains(&"Admin"));
        assert!(parents.contains(&"Sales"));
    }

    #[test]
    fn in_use_predicates() {
        let h = sample();
        let mut user = User::new("U1", "Alice").unwrap();
        user.assign_patent(id("Login"));
        let users = vec![user];

        assert!(h.is_in_use(&id("Sales"), &users));
        assert!(!h.is_in_use(&id("Admin"), &users));
        assert!(h.is_in_use(&id("Login"), &users));
        assert_eq!(h.users_holding(&id("Login"), &users).len(), 1);
        assert!(h.users_holding(&id("Sales"), &users).is_empty());
    }
}
