//! Permission service implementation.

use std::collections::BTreeSet;
use std::fmt::Display;

use permissions::{
    Error, FamilyGraph, Hierarchy, HierarchyStore, NodeId, Principal, Resolution, Resolver, Result,
    User, UserId, Version, cycle,
};
use tracing::{debug, info, warn};

/// The permission API consumed by the rest of the application.
pub struct PermissionService<S> {
    store: S,
    conflict_retries: u32,
}

impl<S: HierarchyStore> PermissionService<S> {
    /// Create a service that surfaces every concurrency conflict.
    pub fn new(store: S) -> Self {
        Self {
            store,
            conflict_retries: 0,
        }
    }

    /// Re-read and retry unpinned mutations up to `retries` times when they
    /// lose a write race. Version-pinned calls (`*_at`) never retry.
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // Resolution

    /// Ids of every patent the user holds, directly or through families.
    pub fn resolve_effective_permissions(&self, user_id: &UserId) -> Result<BTreeSet<NodeId>> {
        let user = self.store.load_user(user_id)?;
        let hierarchy = self.store.snapshot()?;
        let resolution = Resolver::new(&hierarchy).resolve_principal(Principal::User(&user));
        report(user_id, &resolution);
        Ok(resolution.patent_ids())
    }

    pub fn user_has_permission(&self, user_id: &UserId, patent_id: &NodeId) -> Result<bool> {
        let user = self.store.load_user(user_id)?;
        let hierarchy = self.store.snapshot()?;
        Ok(Resolver::new(&hierarchy).contains_patent(Principal::User(&user), patent_id))
    }

    /// Patents assigned to the user directly.
    pub fn direct_permissions(&self, user_id: &UserId) -> Result<BTreeSet<NodeId>> {
        let user = self.store.load_user(user_id)?;
        let hierarchy = self.store.snapshot()?;
        Ok(ids(Resolver::new(&hierarchy).direct_patents_of(&user)))
    }

    /// Patents the user holds only through a family.
    pub fn inherited_permissions(&self, user_id: &UserId) -> Result<BTreeSet<NodeId>> {
        let user = self.store.load_user(user_id)?;
        let hierarchy = self.store.snapshot()?;
        Ok(ids(Resolver::new(&hierarchy).inherited_patents_of(&user)))
    }

    /// Every patent reachable below a family.
    pub fn family_permissions(&self, family_id: &NodeId) -> Result<BTreeSet<NodeId>> {
        let hierarchy = self.store.snapshot()?;
        hierarchy.require_family(family_id)?;
        let resolution = Resolver::new(&hierarchy).resolve_principal(Principal::Family(family_id));
        report(family_id, &resolution);
        Ok(resolution.patent_ids())
    }

    // Structure

    /// Whether attaching `child` under `parent` would close a loop in the
    /// current stored hierarchy.
    pub fn would_create_cycle(&self, parent: &NodeId, child: &NodeId) -> Result<bool> {
        let hierarchy = self.store.snapshot()?;
        Ok(cycle::would_create_cycle(parent, child, &hierarchy))
    }

    /// Attach a child to a family using the version just read.
    ///
    /// Attaching an existing child is a no-op.
    pub fn attach_family_child(&self, parent: &NodeId, child: &NodeId) -> Result<()> {
        self.retrying(|| self.attach(parent, child, None))?;
        Ok(())
    }

    /// Attach a child, conditioned on the family version the caller read
    /// earlier. Returns the family's version after the call.
    pub fn attach_family_child_at(
        &self,
        parent: &NodeId,
        child: &NodeId,
        expected: &Version,
    ) -> Result<Version> {
        self.attach(parent, child, Some(expected))
    }

    /// Detach a child from a family. Detaching an absent child is a no-op.
    pub fn detach_family_child(&self, parent: &NodeId, child: &NodeId) -> Result<()> {
        self.retrying(|| self.detach(parent, child, None))?;
        Ok(())
    }

    /// Detach a child, conditioned on the family version the caller read
    /// earlier. Returns the family's version after the call.
    pub fn detach_family_child_at(
        &self,
        parent: &NodeId,
        child: &NodeId,
        expected: &Version,
    ) -> Result<Version> {
        self.detach(parent, child, Some(expected))
    }

    fn attach(&self, parent: &NodeId, child: &NodeId, expected: Option<&Version>) -> Result<Version> {
        if parent == child {
            return Err(Error::SelfReference(parent.clone()));
        }
        self.edit_family(parent, expected, |hierarchy| hierarchy.attach_child(parent, child))
            .inspect(|version| info!(%parent, %child, %version, "attached child"))
    }

    fn detach(&self, parent: &NodeId, child: &NodeId, expected: Option<&Version>) -> Result<Version> {
        self.edit_family(parent, expected, |hierarchy| hierarchy.detach_child(parent, child))
            .inspect(|version| info!(%parent, %child, %version, "detached child"))
    }

    /// Apply `edit` to a fresh snapshot and write the parent family back.
    fn edit_family(
        &self,
        parent: &NodeId,
        expected: Option<&Version>,
        edit: impl FnOnce(&mut Hierarchy) -> Result<bool>,
    ) -> Result<Version> {
        let mut hierarchy = self.store.snapshot()?;
        let current = hierarchy.require_family(parent)?.version.clone();
        if let Some(expected) = expected {
            if current.as_ref() != Some(expected) {
                return Err(Error::ConcurrencyConflict {
                    id: parent.to_string(),
                });
            }
        }

        if !edit(&mut hierarchy)? {
            debug!(%parent, "family unchanged");
            return current
                .ok_or_else(|| Error::InvalidState(format!("family {parent} has no version")));
        }

        // The cycle check above only holds for the graph it ran against.
        let revision = hierarchy
            .revision()
            .cloned()
            .ok_or_else(|| Error::InvalidState("snapshot carries no hierarchy revision".into()))?;
        let family = hierarchy.require_family(parent)?;
        Ok(self.store.save_family(family, &revision)?)
    }

    // Assignment

    pub fn assign_family_to_user(&self, user_id: &UserId, family_id: &NodeId) -> Result<()> {
        self.store.load_family(family_id)?;
        self.retrying(|| self.edit_user(user_id, |user| user.assign_family(family_id.clone())))?;
        info!(user = %user_id, family = %family_id, "assigned family");
        Ok(())
    }

    pub fn assign_patent_to_user(&self, user_id: &UserId, patent_id: &NodeId) -> Result<()> {
        self.store.load_patent(patent_id)?;
        self.retrying(|| self.edit_user(user_id, |user| user.assign_patent(patent_id.clone())))?;
        info!(user = %user_id, patent = %patent_id, "assigned patent");
        Ok(())
    }

    pub fn unassign_family_from_user(&self, user_id: &UserId, family_id: &NodeId) -> Result<()> {
        self.retrying(|| self.edit_user(user_id, |user| user.unassign_family(family_id)))?;
        Ok(())
    }

    pub fn unassign_patent_from_user(&self, user_id: &UserId, patent_id: &NodeId) -> Result<()> {
        self.retrying(|| self.edit_user(user_id, |user| user.unassign_patent(patent_id)))?;
        Ok(())
    }

    fn edit_user(&self, user_id: &UserId, edit: impl FnOnce(&mut User) -> bool) -> Result<bool> {
        let mut user = self.store.load_user(user_id)?;
        if !edit(&mut user) {
            return Ok(false);
        }
        self.store.save_user(&user)?;
        Ok(true)
    }

    // Integrity

    /// Fail with `InvalidState` if the stored hierarchy contains a cycle or a
    /// family references a node that does not exist.
    pub fn check_integrity(&self) -> Result<()> {
        let hierarchy = self.store.snapshot()?;
        if let Some(path) = hierarchy.find_cycle() {
            let path: Vec<&str> = path.iter().map(NodeId::as_str).collect();
            return Err(Error::InvalidState(format!("cycle: {}", path.join(" -> "))));
        }

        let mut dangling = BTreeSet::new();
        for family in hierarchy.family_ids() {
            if let Some(children) = hierarchy.children_of(family) {
                dangling.extend(children.iter().filter(|c| !hierarchy.contains(c)));
            }
        }
        if !dangling.is_empty() {
            let dangling: Vec<&str> = dangling.into_iter().map(NodeId::as_str).collect();
            return Err(Error::InvalidState(format!(
                "unknown children: {}",
                dangling.join(", ")
            )));
        }
        Ok(())
    }

    fn retrying<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Err(Error::ConcurrencyConflict { id }) if attempt < self.conflict_retries => {
                    attempt += 1;
                    debug!(%id, attempt, "write conflict, retrying");
                }
                other => return other,
            }
        }
    }
}

fn ids(patents: impl IntoIterator<Item = permissions::Patent>) -> BTreeSet<NodeId> {
    patents.into_iter().map(|patent| patent.id).collect()
}

fn report(principal: &dyn Display, resolution: &Resolution) {
    for (parent, child) in &resolution.cycles {
        warn!(%principal, %parent, %child, "cycle in stored hierarchy, revisit skipped");
    }
    if !resolution.dangling.is_empty() {
        warn!(%principal, dangling = ?resolution.dangling, "unknown permission nodes referenced");
    }
}
