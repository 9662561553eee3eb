//! Dependency graph over guest ids.
//!
//! Edges point from dependency to dependent, built from both the explicit
//! `depends_on` lists and the implicit `clone_from` template relationship.
//! The graph must be acyclic; a cycle (including a self-loop) is a fatal
//! configuration error raised before any external mutation.

use crate::catalog::{Catalog, GuestId};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Directed acyclic graph of guest dependencies.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// dependency -> dependents
    edges: BTreeMap<GuestId, BTreeSet<GuestId>>,
    /// dependent -> dependencies (reverse edges, for closure queries)
    reverse: BTreeMap<GuestId, BTreeSet<GuestId>>,
    nodes: BTreeSet<GuestId>,
}

impl DependencyGraph {
    /// Build the graph from a validated catalog and reject cycles.
    pub fn build(catalog: &Catalog) -> Result<Self> {
        let mut graph = Self {
            edges: BTreeMap::new(),
            reverse: BTreeMap::new(),
            nodes: catalog.ids().collect(),
        };

        for spec in catalog.specs() {
            for dep in spec.dependency_ids() {
                graph.add_edge(dep, spec.id);
            }
        }

        let cycle = graph.cycle_members();
        if !cycle.is_empty() {
            return Err(Error::DependencyCycle { members: cycle });
        }

        Ok(graph)
    }

    fn add_edge(&mut self, from: GuestId, to: GuestId) {
        self.edges.entry(from).or_default().insert(to);
        self.reverse.entry(to).or_default().insert(from);
    }

    /// All nodes in the graph, ascending.
    pub fn nodes(&self) -> impl Iterator<Item = GuestId> + '_ {
        self.nodes.iter().copied()
    }

    /// Whether the graph contains the given node.
    pub fn contains(&self, id: GuestId) -> bool {
        self.nodes.contains(&id)
    }

    /// Direct dependents of a guest (guests that must wait for it).
    pub fn dependents(&self, id: GuestId) -> impl Iterator<Item = GuestId> + '_ {
        self.edges.get(&id).into_iter().flatten().copied()
    }

    /// Direct dependencies of a guest.
    pub fn dependencies(&self, id: GuestId) -> impl Iterator<Item = GuestId> + '_ {
        self.reverse.get(&id).into_iter().flatten().copied()
    }

    /// Number of dependencies of a guest (its in-degree).
    pub fn in_degree(&self, id: GuestId) -> usize {
        self.reverse.get(&id).map_or(0, BTreeSet::len)
    }

    /// Transitive dependency closure of the given targets, targets included.
    ///
    /// This is the subgraph a targeted operation must plan: everything the
    /// targets directly or indirectly depend on, and nothing else.
    pub fn dependency_closure(&self, targets: &[GuestId]) -> BTreeSet<GuestId> {
        let mut closure = BTreeSet::new();
        let mut stack: Vec<GuestId> = targets.to_vec();
        while let Some(id) = stack.pop() {
            if closure.insert(id) {
                stack.extend(self.dependencies(id));
            }
        }
        closure
    }

    /// Transitive dependents of a guest, the guest excluded.
    ///
    /// Used to block everything downstream of a failed guest.
    pub fn dependent_closure(&self, id: GuestId) -> BTreeSet<GuestId> {
        let mut closure = BTreeSet::new();
        let mut stack: Vec<GuestId> = self.dependents(id).collect();
        while let Some(next) = stack.pop() {
            if closure.insert(next) {
                stack.extend(self.dependents(next));
            }
        }
        closure
    }

    /// Ids of the guests on a dependency cycle, sorted; empty when the graph
    /// is acyclic.
    ///
    /// Two Kahn peels: the forward peel removes everything with no cycle
    /// among its ancestors, the backward peel everything with no cycle among
    /// its descendants. A guest survives both only when a cycle runs through
    /// it, so dependents merely stuck behind a cycle are not named.
    fn cycle_members(&self) -> Vec<GuestId> {
        let forward = self.peel(
            |id| self.in_degree(id),
            |id| self.dependents(id).collect(),
        );
        if forward.is_empty() {
            return Vec::new();
        }
        let backward = self.peel(
            |id| self.dependents(id).count(),
            |id| self.dependencies(id).collect(),
        );
        forward.intersection(&backward).copied().collect()
    }

    /// Kahn peel: repeatedly remove degree-zero nodes, returning whatever
    /// cannot be removed.
    fn peel<D, N>(&self, degree_of: D, released_by: N) -> BTreeSet<GuestId>
    where
        D: Fn(GuestId) -> usize,
        N: Fn(GuestId) -> Vec<GuestId>,
    {
        let mut degree: BTreeMap<GuestId, usize> = self
            .nodes
            .iter()
            .map(|&id| (id, degree_of(id)))
            .collect();

        let mut ready: Vec<GuestId> = degree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut removed = BTreeSet::new();
        while let Some(id) = ready.pop() {
            removed.insert(id);
            for next in released_by(id) {
                if let Some(d) = degree.get_mut(&next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(next);
                    }
                }
            }
        }

        self.nodes
            .iter()
            .filter(|id| !removed.contains(id))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::spec;

    fn catalog(specs: Vec<crate::catalog::GuestSpec>) -> Catalog {
        Catalog::from_specs(specs).unwrap()
    }

    #[test]
    fn test_build_simple_chain() {
        let mut b = spec(101);
        b.depends_on = vec![GuestId(100)];
        let graph = DependencyGraph::build(&catalog(vec![spec(100), b])).unwrap();

        assert_eq!(graph.in_degree(GuestId(100)), 0);
        assert_eq!(graph.in_degree(GuestId(101)), 1);
        assert_eq!(
            graph.dependents(GuestId(100)).collect::<Vec<_>>(),
            vec![GuestId(101)]
        );
    }

    #[test]
    fn test_clone_from_is_an_edge() {
        let mut tpl = spec(900);
        tpl.kind = crate::catalog::GuestKind::Template;
        let mut inst = spec(950);
        inst.clone_from = Some(GuestId(900));
        let graph = DependencyGraph::build(&catalog(vec![tpl, inst])).unwrap();

        assert_eq!(
            graph.dependencies(GuestId(950)).collect::<Vec<_>>(),
            vec![GuestId(900)]
        );
    }

    #[test]
    fn test_cycle_rejected_with_members() {
        let mut a = spec(1);
        a.depends_on = vec![GuestId(3)];
        let mut b = spec(2);
        b.depends_on = vec![GuestId(1)];
        let mut c = spec(3);
        c.depends_on = vec![GuestId(2)];
        let d = spec(4); // not on the cycle

        let err = DependencyGraph::build(&catalog(vec![a, b, c, d])).unwrap_err();
        match err {
            Error::DependencyCycle { members } => {
                assert_eq!(members, vec![GuestId(1), GuestId(2), GuestId(3)]);
            }
            other => panic!("expected cycle error, got {other}"),
        }
    }

    #[test]
    fn test_cycle_members_exclude_downstream_guests() {
        // 1 and 2 form the cycle; 3 only depends on it.
        let mut a = spec(1);
        a.depends_on = vec![GuestId(2)];
        let mut b = spec(2);
        b.depends_on = vec![GuestId(1)];
        let mut c = spec(3);
        c.depends_on = vec![GuestId(1)];

        let err = DependencyGraph::build(&catalog(vec![a, b, c])).unwrap_err();
        match err {
            Error::DependencyCycle { members } => {
                assert_eq!(members, vec![GuestId(1), GuestId(2)]);
            }
            other => panic!("expected cycle error, got {other}"),
        }
    }

    #[test]
    fn test_self_dependency_is_one_node_cycle() {
        let mut a = spec(7);
        a.depends_on = vec![GuestId(7)];
        let err = DependencyGraph::build(&catalog(vec![a])).unwrap_err();
        match err {
            Error::DependencyCycle { members } => assert_eq!(members, vec![GuestId(7)]),
            other => panic!("expected cycle error, got {other}"),
        }
    }

    #[test]
    fn test_dependency_closure() {
        // 100 <- 101 <- 102, 103 independent
        let mut b = spec(101);
        b.depends_on = vec![GuestId(100)];
        let mut c = spec(102);
        c.depends_on = vec![GuestId(101)];
        let graph =
            DependencyGraph::build(&catalog(vec![spec(100), b, c, spec(103)])).unwrap();

        let closure = graph.dependency_closure(&[GuestId(102)]);
        assert_eq!(
            closure.into_iter().collect::<Vec<_>>(),
            vec![GuestId(100), GuestId(101), GuestId(102)]
        );
    }

    #[test]
    fn test_dependent_closure() {
        let mut b = spec(101);
        b.depends_on = vec![GuestId(100)];
        let mut c = spec(102);
        c.depends_on = vec![GuestId(101)];
        let graph =
            DependencyGraph::build(&catalog(vec![spec(100), b, c, spec(103)])).unwrap();

        let downstream = graph.dependent_closure(GuestId(100));
        assert_eq!(
            downstream.into_iter().collect::<Vec<_>>(),
            vec![GuestId(101), GuestId(102)]
        );
        assert!(graph.dependent_closure(GuestId(103)).is_empty());
    }
}
