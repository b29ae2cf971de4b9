//! Effective permission resolution.
//!
//! The resolver flattens a principal's direct assignments into the set of
//! patents reachable through any path. Each call walks a fresh snapshot and
//! keeps its own visited set, so it always terminates, even on a hierarchy
//! that (wrongly) contains a cycle.

use std::collections::{BTreeSet, HashSet, btree_set};
use std::ops::ControlFlow;

use crate::{Hierarchy, NodeId, Patent, PermissionNode, User};

/// Whose permissions are being resolved.
#[derive(Debug, Clone, Copy)]
pub enum Principal<'a> {
    User(&'a User),
    Family(&'a NodeId),
}

impl<'a> From<&'a User> for Principal<'a> {
    fn from(user: &'a User) -> Self {
        Principal::User(user)
    }
}

/// Result of a resolution along with anything odd met on the way.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Deduplicated by patent id.
    pub patents: HashSet<Patent>,
    /// Edges `(parent, child)` that lead back into the current walk path.
    pub cycles: Vec<(NodeId, NodeId)>,
    /// Referenced ids missing from the snapshot.
    pub dangling: BTreeSet<NodeId>,
}

impl Resolution {
    /// No cycles and no dangling references were encountered.
    pub fn is_clean(&self) -> bool {
        self.cycles.is_empty() && self.dangling.is_empty()
    }

    pub fn patent_ids(&self) -> BTreeSet<NodeId> {
        self.patents.iter().map(|p| p.id.clone()).collect()
    }
}

enum Step<'h> {
    Patent(&'h Patent),
    Cycle { parent: NodeId, child: NodeId },
    Dangling(NodeId),
}

struct Walk<'h> {
    hierarchy: &'h Hierarchy,
    visited: HashSet<&'h NodeId>,
    path: Vec<&'h NodeId>,
    stack: Vec<btree_set::Iter<'h, NodeId>>,
}

impl<'h> Walk<'h> {
    fn new(hierarchy: &'h Hierarchy) -> Self {
        Self {
            hierarchy,
            visited: HashSet::new(),
            path: Vec::new(),
            stack: Vec::new(),
        }
    }

    fn run<'r, F>(mut self, roots: impl IntoIterator<Item = &'r NodeId>, mut visit: F) -> ControlFlow<()>
    where
        F: FnMut(Step<'h>) -> ControlFlow<()>,
    {
        for root in roots {
            self.enter(root, &mut visit)?;
            while let Some(children) = self.stack.last_mut() {
                match children.next() {
                    Some(child) => self.enter(child, &mut visit)?,
                    None => {
                        self.stack.pop();
                        self.path.pop();
                    }
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn enter<F>(&mut self, id: &NodeId, visit: &mut F) -> ControlFlow<()>
    where
        F: FnMut(Step<'h>) -> ControlFlow<()>,
    {
        match self.hierarchy.get(id) {
            None => visit(Step::Dangling(id.clone())),
            Some(PermissionNode::Patent(patent)) => visit(Step::Patent(patent)),
            Some(PermissionNode::Family(family)) => {
                if self.path.contains(&&family.id) {
                    let parent = self.path.last().map_or_else(|| family.id.clone(), |p| (*p).clone());
                    return visit(Step::Cycle {
                        parent,
                        child: family.id.clone(),
                    });
                }
                if self.visited.insert(&family.id) {
                    self.path.push(&family.id);
                    self.stack.push(family.children().iter());
                }
                ControlFlow::Continue(())
            }
        }
    }
}

/// Resolves effective permissions against one hierarchy snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'h> {
    hierarchy: &'h Hierarchy,
}

impl<'h> Resolver<'h> {
    pub fn new(hierarchy: &'h Hierarchy) -> Self {
        Self { hierarchy }
    }

    /// Every patent reachable from the given direct assignments.
    pub fn resolve<'r>(
        &self,
        direct_families: impl IntoIterator<Item = &'r NodeId>,
        direct_patents: impl IntoIterator<Item = &'r NodeId>,
    ) -> HashSet<Patent> {
        self.resolve_with_diagnostics(direct_families, direct_patents)
            .patents
    }

    /// Like [`resolve`](Self::resolve), also reporting cycles and dangling ids.
    pub fn resolve_with_diagnostics<'r>(
        &self,
        direct_families: impl IntoIterator<Item = &'r NodeId>,
        direct_patents: impl IntoIterator<Item = &'r NodeId>,
    ) -> Resolution {
        let mut resolution = Resolution::default();
        let roots = direct_patents.into_iter().chain(direct_families);
        let _ = Walk::new(self.hierarchy).run(roots, |step| {
            match step {
                Step::Patent(patent) => {
                    if !resolution.patents.contains(patent) {
                        resolution.patents.insert(patent.clone());
                    }
                }
                Step::Cycle { parent, child } => resolution.cycles.push((parent, child)),
                Step::Dangling(id) => {
                    resolution.dangling.insert(id);
                }
            }
            ControlFlow::Continue(())
        });
        resolution
    }

    pub fn resolve_principal(&self, principal: Principal<'_>) -> Resolution {
        match principal {
            Principal::User(user) => {
                self.resolve_with_diagnostics(user.direct_families(), user.direct_patents())
            }
            Principal::Family(id) => self.resolve_with_diagnostics([id], []),
        }
    }

    pub fn effective_patents(&self, principal: Principal<'_>) -> HashSet<Patent> {
        self.resolve_principal(principal).patents
    }

    /// The user's directly assigned patents, without walking any family.
    pub fn direct_patents_of(&self, user: &User) -> HashSet<Patent> {
        user.direct_patents()
            .iter()
            .filter_map(|id| self.hierarchy.patent(id))
            .cloned()
            .collect()
    }

    /// Patents the user only holds through a family.
    pub fn inherited_patents_of(&self, user: &User) -> HashSet<Patent> {
        let direct = self.direct_patents_of(user);
        self.effective_patents(Principal::User(user))
            .into_iter()
            .filter(|patent| !direct.contains(patent))
            .collect()
    }

    /// Whether `patent` is reachable, stopping as soon as it is found.
    pub fn contains_patent(&self, principal: Principal<'_>, patent: &NodeId) -> bool {
        let check = |step: Step<'h>| match step {
            Step::Patent(found) if &found.id == patent => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        };
        let walk = Walk::new(self.hierarchy);
        match principal {
            Principal::User(user) => walk
                .run(user.direct_patents().iter().chain(user.direct_families()), check)
                .is_break(),
            Principal::Family(id) => walk.run([id], check).is_break(),
        }
    }

    pub fn count_effective(&self, principal: Principal<'_>) -> usize {
        self.effective_patents(principal).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Family;

    fn id(s: &str) -> NodeId {
        NodeId::from(s)
    }

    fn ids(patents: &HashSet<Patent>) -> BTreeSet<&str> {
        patents.iter().map(|p| p.id.as_str()).collect()
    }

    fn expected<'a>(names: &[&'a str]) -> BTreeSet<&'a str> {
        names.iter().copied().collect()
    }

    /// Admin -> { Sales, ManageUsers }, Sales -> { CreateInvoice, ViewClients }
    fn sample() -> Hierarchy {
        let mut h = Hierarchy::new();
        for patent in ["CreateInvoice", "ViewClients", "ManageUsers", "Login"] {
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
    fn nested_family_flattens() {
        let h = sample();
        let mut user = User::new("U1", "U1").unwrap();
        user.assign_family(id("Admin"));

        let resolver = Resolver::new(&h);
        let effective = resolver.effective_patents(Principal::User(&user));

        assert_eq!(
            ids(&effective),
            expected(&["CreateInvoice", "ViewClients", "ManageUsers"])
        );
        assert_eq!(resolver.count_effective(Principal::User(&user)), 3);
    }

    #[test]
    fn direct_and_inherited_split() {
        let h = sample();
        let mut user = User::new("U2", "U2").unwrap();
        user.assign_patent(id("Login"));
        user.assign_family(id("Sales"));

        let resolver = Resolver::new(&h);
        let effective = resolver.effective_patents(Principal::User(&user));
        let direct = resolver.direct_patents_of(&user);
        let inherited = resolver.inherited_patents_of(&user);

        assert_eq!(ids(&effective), expected(&["Login", "CreateInvoice", "ViewClients"]));
        assert_eq!(ids(&direct), expected(&["Login"]));
        assert_eq!(ids(&inherited), expected(&["CreateInvoice", "ViewClients"]));
        assert!(effective.is_superset(&direct));
    }

    #[test]
    fn patent_reached_twice_counted_once() {
        let mut h = sample();
        h.attach_child(&id("Admin"), &id("ViewClients")).unwrap();
        let mut user = User::new("U3", "U3").unwrap();
        user.assign_patent(id("ViewClients"));
        user.assign_family(id("Admin"));
        user.assign_family(id("Sales"));

        let resolution = Resolver::new(&h).resolve_principal(Principal::User(&user));

        assert_eq!(resolution.patents.len(), 3);
        assert!(resolution.is_clean());
    }

    #[test]
    fn empty_input_yields_empty_set() {
        let h = sample();
        let resolver = Resolver::new(&h);
        assert!(resolver.resolve([], []).is_empty());

        let empty = Hierarchy::new();
        let mut user = User::new("U4", "U4").unwrap();
        user.assign_family(id("Admin"));
        let resolution = Resolver::new(&empty).resolve_principal(Principal::User(&user));
        assert!(resolution.patents.is_empty());
        assert_eq!(resolution.dangling.len(), 1);
    }

    #[test]
    fn existing_cycle_terminates() {
        let mut h = Hierarchy::new();
        h.insert(Patent::new("p", "p").unwrap());
        let mut x = Family::new("X", "X").unwrap();
        let mut y = Family::new("Y", "Y").unwrap();
        // Bypass the attach checks to simulate legacy data.
        x.insert_child(id("Y"));
        y.insert_child(id("X"));
        y.insert_child(id("p"));
        h.insert(x);
        h.insert(y);

        let resolution = Resolver::new(&h).resolve([&id("X")], []);
        assert_eq!(ids(&resolution), expected(&["p"]));

        let diagnosed = Resolver::new(&h).resolve_principal(Principal::Family(&id("X")));
        assert_eq!(diagnosed.cycles, vec![(id("Y"), id("X"))]);
        assert!(!diagnosed.is_clean());
    }

    #[test]
    fn diamond_is_not_reported_as_cycle() {
        let mut h = sample();
        h.insert(Family::new("Top", "Top").unwrap());
        h.attach_child(&id("Top"), &id("Admin")).unwrap();
        h.attach_child(&id("Top"), &id("Sales")).unwrap();

        let resolution = Resolver::new(&h).resolve_principal(Principal::Family(&id("Top")));
        assert!(resolution.cycles.is_empty());
        assert_eq!(resolution.patents.len(), 3);
    }

    #[test]
    fn contains_patent() {
        let h = sample();
        let mut user = User::new("U1", "U1").unwrap();
        user.assign_family(id("Admin"));
        let resolver = Resolver::new(&h);

        assert!(resolver.contains_patent(Principal::User(&user), &id("CreateInvoice")));
        assert!(!resolver.contains_patent(Principal::User(&user), &id("Login")));
        assert!(resolver.contains_patent(Principal::Family(&id("Sales")), &id("ViewClients")));
        assert!(!resolver.contains_patent(Principal::Family(&id("Sales")), &id("ManageUsers")));
    }
}
