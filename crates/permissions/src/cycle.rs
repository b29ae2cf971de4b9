//! Cycle prevention over the family containment graph.
//!
//! Every function here is a pure read of a [`FamilyGraph`] and keeps a
//! visited set, so it terminates even if the graph is already cyclic.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::ControlFlow;

use crate::NodeId;

/// Read-only view of family → children edges.
pub trait FamilyGraph {
    /// Children of `id`, or `None` if `id` is not a family in this view.
    fn children_of(&self, id: &NodeId) -> Option<&BTreeSet<NodeId>>;

    /// Ids of every family in the view.
    fn family_ids(&self) -> impl Iterator<Item = &NodeId>;
}

impl FamilyGraph for HashMap<NodeId, BTreeSet<NodeId>> {
    fn children_of(&self, id: &NodeId) -> Option<&BTreeSet<NodeId>> {
        self.get(id)
    }

    fn family_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.keys()
    }
}

/// Depth-first walk over everything reachable below `start`, each node at most once.
fn walk_descendants<'g, G: FamilyGraph>(
    start: &NodeId,
    graph: &'g G,
    mut visit: impl FnMut(&'g NodeId) -> ControlFlow<()>,
) -> ControlFlow<()> {
    let mut seen: HashSet<&'g NodeId> = HashSet::new();
    let mut stack: Vec<&'g NodeId> = graph
        .children_of(start)
        .map(|children| children.iter().collect())
        .unwrap_or_default();

    while let Some(node) = stack.pop() {
        if !seen.insert(node) {
            continue;
        }
        visit(node)?;
        if let Some(children) = graph.children_of(node) {
            stack.extend(children.iter().filter(|c| !seen.contains(*c)));
        }
    }
    ControlFlow::Continue(())
}

/// All nodes reachable below `start`. `start` itself is included only if the
/// graph already loops back to it.
pub fn descendants<G: FamilyGraph>(start: &NodeId, graph: &G) -> HashSet<NodeId> {
    let mut found = HashSet::new();
    let _ = walk_descendants(start, graph, |node| {
        found.insert(node.clone());
        ControlFlow::Continue(())
    });
    found
}

/// Whether `ancestor` transitively contains `node`.
pub fn is_ancestor<G: FamilyGraph>(ancestor: &NodeId, node: &NodeId, graph: &G) -> bool {
    walk_descendants(ancestor, graph, |found| {
        if found == node {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })
    .is_break()
}

/// Whether attaching `child` under `parent` would close a loop.
///
/// True when the two ids are equal or when `parent` is already reachable from
/// `child`.
pub fn would_create_cycle<G: FamilyGraph>(parent: &NodeId, child: &NodeId, graph: &G) -> bool {
    parent == child || is_ancestor(child, parent, graph)
}

/// Find one cycle in the whole graph, returned as a closed path
/// (`[a, b, a]`).
pub fn find_cycle<G: FamilyGraph>(graph: &G) -> Option<Vec<NodeId>> {
    let mut finished: HashSet<&NodeId> = HashSet::new();

    for root in graph.family_ids() {
        if finished.contains(root) {
            continue;
        }
        let Some(root_children) = graph.children_of(root) else {
            continue;
        };

        let mut path = vec![root];
        let mut on_path: HashSet<&NodeId> = HashSet::from([root]);
        let mut stack = vec![root_children.iter()];

        while let Some(children) = stack.last_mut() {
            match children.next() {
                Some(child) if on_path.contains(child) => {
                    let start = path.iter().position(|n| *n == child).unwrap_or(0);
                    let mut cycle: Vec<NodeId> = path[start..].iter().map(|n| (*n).clone()).collect();
                    cycle.push(child.clone());
                    return Some(cycle);
                }
                Some(child) if finished.contains(child) => {}
                Some(child) => match graph.children_of(child) {
                    Some(grandchildren) => {
                        path.push(child);
                        on_path.insert(child);
                        stack.push(grandchildren.iter());
                    }
                    None => {
                        finished.insert(child);
                    }
                },
                None => {
                    stack.pop();
                    if let Some(done) = path.pop() {
                        on_path.remove(done);
                        finished.insert(done);
                    }
                }
            }
        }
    }

    None
}
