//! Execution planner - deterministic, dependency-respecting total order.
//!
//! Kahn's algorithm over the dependency graph. When several guests are ready
//! at once the tie-break is (order_hint ascending, id ascending), so planning
//! the same catalog twice always yields the same plan, and ordering hints are
//! honored exactly where they do not conflict with a dependency edge.

use crate::catalog::{Catalog, GuestId};
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

/// An ordered execution plan over guest ids.
///
/// For every dependency edge (A -> B), A appears before B. `waves` partitions
/// the same order into dependency levels: guests within one wave share no
/// edge, directly or transitively, and may run concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    order: Vec<GuestId>,
    waves: Vec<Vec<GuestId>>,
}

impl ExecutionPlan {
    /// The total order, dependencies first.
    pub fn order(&self) -> &[GuestId] {
        &self.order
    }

    /// Dependency levels; each wave only depends on earlier waves.
    pub fn waves(&self) -> &[Vec<GuestId>] {
        &self.waves
    }

    /// Position of a guest in the plan.
    pub fn position(&self, id: GuestId) -> Option<usize> {
        self.order.iter().position(|&g| g == id)
    }

    /// Number of guests in the plan.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the plan is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The same plan in reverse (dependents first); used for stop ordering.
    pub fn reversed(&self) -> Vec<GuestId> {
        self.order.iter().rev().copied().collect()
    }
}

/// Min-order wrapper so the ready set pops (lowest hint, lowest id) first.
#[derive(PartialEq, Eq)]
struct Ready {
    hint: i64,
    id: GuestId,
}

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; invert for min-first ordering.
        (other.hint, other.id).cmp(&(self.hint, self.id))
    }
}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Plan the whole catalog.
pub fn plan(graph: &DependencyGraph, catalog: &Catalog) -> Result<ExecutionPlan> {
    let nodes: BTreeSet<GuestId> = graph.nodes().collect();
    plan_subset(graph, catalog, &nodes)
}

/// Plan a targeted operation: the targets plus their transitive dependency
/// closure, under the same ordering rules as a full plan.
pub fn plan_targets(
    graph: &DependencyGraph,
    catalog: &Catalog,
    targets: &[GuestId],
) -> Result<ExecutionPlan> {
    for &target in targets {
        if !graph.contains(target) {
            return Err(Error::config(format!("unknown guest id: {target}")));
        }
    }
    let closure = graph.dependency_closure(targets);
    plan_subset(graph, catalog, &closure)
}

fn plan_subset(
    graph: &DependencyGraph,
    catalog: &Catalog,
    subset: &BTreeSet<GuestId>,
) -> Result<ExecutionPlan> {
    let hint = |id: GuestId| catalog.get(id).map_or(0, crate::catalog::GuestSpec::hint);

    // In-degrees restricted to the subset; edges leaving the subset cannot
    // exist for a dependency closure, but a full-graph subset is the graph
    // itself, so count only edges whose tail is inside.
    let mut in_degree: BTreeMap<GuestId, usize> = subset
        .iter()
        .map(|&id| {
            let d = graph.dependencies(id).filter(|dep| subset.contains(dep)).count();
            (id, d)
        })
        .collect();

    let mut ready: BinaryHeap<Ready> = in_degree
        .iter()
        .filter(|&(_, &d)| d == 0)
        .map(|(&id, _)| Ready { hint: hint(id), id })
        .collect();

    let mut order = Vec::with_capacity(subset.len());
    let mut waves: Vec<Vec<GuestId>> = Vec::new();
    let mut level: BTreeMap<GuestId, usize> = BTreeMap::new();

    while let Some(Ready { id, .. }) = ready.pop() {
        // Wave = 1 + max level of in-subset dependencies.
        let wave = graph
            .dependencies(id)
            .filter(|dep| subset.contains(dep))
            .map(|dep| level[&dep] + 1)
            .max()
            .unwrap_or(0);
        level.insert(id, wave);
        if waves.len() <= wave {
            waves.resize(wave + 1, Vec::new());
        }
        waves[wave].push(id);
        order.push(id);

        for dependent in graph.dependents(id) {
            if let Some(d) = in_degree.get_mut(&dependent) {
                *d -= 1;
                if *d == 0 {
                    ready.push(Ready {
                        hint: hint(dependent),
                        id: dependent,
                    });
                }
            }
        }
    }

    // Graph construction already rejects cycles; leftovers here would mean
    // the subset was not closed under dependencies.
    if order.len() != subset.len() {
        let members: Vec<GuestId> = subset
            .iter()
            .filter(|id| !level.contains_key(id))
            .copied()
            .collect();
        return Err(Error::DependencyCycle { members });
    }

    Ok(ExecutionPlan { order, waves })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{spec, GuestSpec};

    fn build(specs: Vec<GuestSpec>) -> (DependencyGraph, Catalog) {
        let catalog = Catalog::from_specs(specs).unwrap();
        let graph = DependencyGraph::build(&catalog).unwrap();
        (graph, catalog)
    }

    fn ids(raw: &[u32]) -> Vec<GuestId> {
        raw.iter().map(|&n| GuestId(n)).collect()
    }

    #[test]
    fn test_plan_respects_dependencies() {
        let mut b = spec(101);
        b.depends_on = vec![GuestId(100)];
        let mut c = spec(102);
        c.depends_on = vec![GuestId(101)];
        let (graph, catalog) = build(vec![c, spec(100), b]);

        let plan = plan(&graph, &catalog).unwrap();
        assert_eq!(plan.order(), ids(&[100, 101, 102]).as_slice());
        for id in graph.nodes() {
            for dep in graph.dependencies(id) {
                assert!(plan.position(dep).unwrap() < plan.position(id).unwrap());
            }
        }
    }

    #[test]
    fn test_plan_is_deterministic() {
        let mut b = spec(5);
        b.depends_on = vec![GuestId(9)];
        let (graph, catalog) = build(vec![spec(9), b, spec(2), spec(7)]);

        let first = plan(&graph, &catalog).unwrap();
        let second = plan(&graph, &catalog).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_hint_orders_independent_guests() {
        let mut late = spec(100);
        late.order_hint = Some(10);
        let mut early = spec(200);
        early.order_hint = Some(1);
        let (graph, catalog) = build(vec![late, early]);

        let plan = plan(&graph, &catalog).unwrap();
        assert_eq!(plan.order(), ids(&[200, 100]).as_slice());
    }

    #[test]
    fn test_hint_never_overrides_dependency() {
        // 100 wants to run last by hint but 101 depends on it.
        let mut dep = spec(100);
        dep.order_hint = Some(1000);
        let mut dependent = spec(101);
        dependent.order_hint = Some(-5);
        dependent.depends_on = vec![GuestId(100)];
        let (graph, catalog) = build(vec![dep, dependent]);

        let plan = plan(&graph, &catalog).unwrap();
        assert_eq!(plan.order(), ids(&[100, 101]).as_slice());
    }

    #[test]
    fn test_equal_hints_tie_break_by_id() {
        let (graph, catalog) = build(vec![spec(30), spec(10), spec(20)]);
        for _ in 0..3 {
            let plan = plan(&graph, &catalog).unwrap();
            assert_eq!(plan.order(), ids(&[10, 20, 30]).as_slice());
        }
    }

    #[test]
    fn test_targeted_closure() {
        // A(100) <- B(101) <- C(102); D(103) independent.
        let mut b = spec(101);
        b.depends_on = vec![GuestId(100)];
        let mut c = spec(102);
        c.depends_on = vec![GuestId(101)];
        let (graph, catalog) = build(vec![spec(100), b, c, spec(103)]);

        let plan = plan_targets(&graph, &catalog, &[GuestId(102)]).unwrap();
        assert_eq!(plan.order(), ids(&[100, 101, 102]).as_slice());
        assert_eq!(plan.position(GuestId(103)), None);
    }

    #[test]
    fn test_unknown_target_rejected() {
        let (graph, catalog) = build(vec![spec(100)]);
        let err = plan_targets(&graph, &catalog, &[GuestId(404)]).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_waves_partition_by_dependency_level() {
        // 1 and 2 independent; 3 depends on both; 4 depends on 3.
        let mut c = spec(3);
        c.depends_on = vec![GuestId(1), GuestId(2)];
        let mut d = spec(4);
        d.depends_on = vec![GuestId(3)];
        let (graph, catalog) = build(vec![spec(1), spec(2), c, d]);

        let plan = plan(&graph, &catalog).unwrap();
        assert_eq!(
            plan.waves(),
            &[ids(&[1, 2]), ids(&[3]), ids(&[4])]
        );
    }

    #[test]
    fn test_reversed_for_stop_ordering() {
        let mut b = spec(101);
        b.depends_on = vec![GuestId(100)];
        let (graph, catalog) = build(vec![spec(100), b]);

        let plan = plan(&graph, &catalog).unwrap();
        assert_eq!(plan.reversed(), ids(&[101, 100]));
    }
}
