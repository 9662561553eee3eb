//! Command implementations. Each returns whether the operation fully
//! succeeded; main turns a false into a nonzero exit code.

pub mod converge;
pub mod delete;
pub mod plan;
pub mod power;
pub mod status;

use anyhow::Context;
use convergent::{Catalog, DependencyGraph, ExecutionPlan, GuestId};
use std::path::Path;

/// Loaded catalog plus its validated dependency graph.
pub struct Fleet {
    pub catalog: Catalog,
    pub graph: DependencyGraph,
}

/// Load and validate the catalog, then build the graph. Any error here is
/// fatal and happens before a single platform command runs.
pub fn load_fleet(path: &Path) -> anyhow::Result<Fleet> {
    let catalog = Catalog::load(path)
        .with_context(|| format!("loading catalog {}", path.display()))?;
    let graph = DependencyGraph::build(&catalog).context("resolving dependency graph")?;
    Ok(Fleet { catalog, graph })
}

impl Fleet {
    /// Plan for the named targets plus their dependency closure, or the
    /// whole catalog when no ids are given.
    pub fn plan_for(&self, ids: &[u32]) -> anyhow::Result<ExecutionPlan> {
        let targets: Vec<GuestId> = ids.iter().copied().map(GuestId).collect();
        let plan = if targets.is_empty() {
            convergent::plan(&self.graph, &self.catalog)?
        } else {
            convergent::plan_targets(&self.graph, &self.catalog, &targets)?
        };
        Ok(plan)
    }

    /// Resolve named ids to specs, failing on any id the catalog lacks.
    pub fn named_specs(&self, ids: &[u32]) -> anyhow::Result<Vec<convergent::GuestSpec>> {
        ids.iter()
            .map(|&raw| {
                let id = GuestId(raw);
                self.catalog
                    .resolved_spec(id)
                    .with_context(|| format!("unknown guest id: {id}"))
            })
            .collect()
    }
}
