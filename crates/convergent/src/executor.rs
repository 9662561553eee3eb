//! Run executor - drives a plan wave by wave over a bounded worker pool.
//!
//! Guests inside one wave share no dependency edge and run in parallel;
//! waves run in order, so a dependent guest never starts until everything it
//! depends on has reached terminal success. A failed guest blocks its
//! transitive dependents but leaves independent branches running.

use crate::catalog::{Catalog, GuestId};
use crate::error::Error;
use crate::graph::DependencyGraph;
use crate::lifecycle::{run_pipeline, GuestRun, PipelineOptions, Stage};
use crate::planner::ExecutionPlan;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Per-guest outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum GuestStatus {
    /// Reached terminal success and at least one change was applied
    Converged,
    /// Reached terminal success with inspections only
    Unchanged,
    /// A stage failed permanently or exhausted its retries
    Failed {
        /// The stage that was being converged
        stage: Stage,
        /// The underlying error message
        reason: String,
    },
    /// Never started because a dependency failed
    Blocked {
        /// The failed dependency
        on: GuestId,
    },
    /// Never finished because the run was cancelled
    Cancelled,
}

impl GuestStatus {
    /// Whether this guest reached terminal success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Converged | Self::Unchanged)
    }
}

/// Aggregated result of one run.
#[derive(Debug, Default)]
pub struct RunSummary {
    results: BTreeMap<GuestId, GuestStatus>,
}

impl RunSummary {
    /// Per-guest results, in id order.
    pub fn results(&self) -> impl Iterator<Item = (GuestId, &GuestStatus)> {
        self.results.iter().map(|(&id, status)| (id, status))
    }

    /// Result for one guest.
    pub fn status(&self, id: GuestId) -> Option<&GuestStatus> {
        self.results.get(&id)
    }

    /// Number of guests that reached terminal success.
    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|s| s.is_success()).count()
    }

    /// Number of guests that failed, were blocked, or were cancelled.
    pub fn unsuccessful(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Overall success: every targeted guest reached terminal success.
    pub fn is_success(&self) -> bool {
        self.results.values().all(GuestStatus::is_success)
    }

    /// Number of guests in the run.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the run covered no guests.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    fn record(&mut self, id: GuestId, status: GuestStatus) {
        self.results.insert(id, status);
    }
}

/// Progress callback for run execution. Completions are reported after each
/// wave, in id order (workers do not call back mid-wave).
pub trait ProgressCallback: Send {
    /// Called before a wave of independent guests starts
    fn on_wave_start(&mut self, wave: usize, guests: &[GuestId]);

    /// Called for each guest once its wave completes
    fn on_guest_complete(&mut self, id: GuestId, status: &GuestStatus);
}

/// No-op progress callback.
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_wave_start(&mut self, _wave: usize, _guests: &[GuestId]) {}
    fn on_guest_complete(&mut self, _id: GuestId, _status: &GuestStatus) {}
}

/// Options for run execution.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Worker pool size for independent guests
    pub jobs: usize,
    /// Pipeline options (retry policy, ready timeout)
    pub pipeline: PipelineOptions,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            pipeline: PipelineOptions::default(),
        }
    }
}

/// Execute a plan: converge every guest in it, waves in order.
///
/// The shared mutable state of a run is exactly the per-guest completion map
/// held here; guest specs are read-only once the catalog is loaded.
pub fn execute<P: ProgressCallback>(
    adapter: &(dyn crate::adapter::GuestAdapter),
    catalog: &Catalog,
    graph: &DependencyGraph,
    plan: &ExecutionPlan,
    opts: &ExecuteOptions,
    cancel: &AtomicBool,
    progress: &mut P,
) -> RunSummary {
    let mut summary = RunSummary::default();

    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(opts.jobs.max(1))
        .build()
    {
        Ok(pool) => pool,
        Err(e) => {
            // Without a pool nothing can run; report every guest as failed.
            for &id in plan.order() {
                summary.record(
                    id,
                    GuestStatus::Failed {
                        stage: Stage::Unvalidated,
                        reason: format!("worker pool: {e}"),
                    },
                );
            }
            return summary;
        }
    };

    for (wave_index, wave) in plan.waves().iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            for &id in wave {
                summary.record(id, GuestStatus::Cancelled);
            }
            continue;
        }

        // Release only guests whose dependencies all succeeded.
        let mut runnable = Vec::new();
        for &id in wave {
            match first_failed_dependency(graph, &summary, id) {
                Some(on) => summary.record(id, GuestStatus::Blocked { on }),
                None => runnable.push(id),
            }
        }

        progress.on_wave_start(wave_index, &runnable);

        let results: Arc<Mutex<Vec<(GuestId, GuestStatus)>>> =
            Arc::new(Mutex::new(Vec::with_capacity(runnable.len())));

        pool.install(|| {
            runnable.par_iter().for_each(|&id| {
                let status = converge_one(adapter, catalog, id, opts, cancel);
                if let Ok(mut results) = results.lock() {
                    results.push((id, status));
                }
            });
        });

        let mut wave_results = match results.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        wave_results.sort_by_key(|(id, _)| *id);
        for (id, status) in wave_results {
            progress.on_guest_complete(id, &status);
            summary.record(id, status);
        }
    }

    summary
}

fn converge_one(
    adapter: &dyn crate::adapter::GuestAdapter,
    catalog: &Catalog,
    id: GuestId,
    opts: &ExecuteOptions,
    cancel: &AtomicBool,
) -> GuestStatus {
    let Some(spec) = catalog.resolved_spec(id) else {
        return GuestStatus::Failed {
            stage: Stage::Unvalidated,
            reason: format!("guest {id} not in catalog"),
        };
    };

    let run = run_pipeline(adapter, &spec, &opts.pipeline, cancel);
    status_of(&run)
}

fn status_of(run: &GuestRun) -> GuestStatus {
    if run.is_converged() {
        if run.changed() {
            GuestStatus::Converged
        } else {
            GuestStatus::Unchanged
        }
    } else {
        match &run.error {
            Some(Error::Cancelled) => GuestStatus::Cancelled,
            Some(e) => GuestStatus::Failed {
                stage: run
                    .reports
                    .last()
                    .and_then(|r| r.stage.next())
                    .unwrap_or(Stage::Defined),
                reason: e.to_string(),
            },
            None => GuestStatus::Failed {
                stage: run.state,
                reason: "pipeline stopped without error".to_string(),
            },
        }
    }
}

/// The lowest-id dependency of `id` that did not succeed, if any.
fn first_failed_dependency(
    graph: &DependencyGraph,
    summary: &RunSummary,
    id: GuestId,
) -> Option<GuestId> {
    graph.dependencies(id).find(|dep| {
        summary
            .status(*dep)
            .is_some_and(|status| !status.is_success())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Aspect, AspectState};
    use crate::catalog::{spec, GuestSpec};
    use crate::mock::{MockAdapter, Scripted};
    use crate::planner;
    use crate::retry::RetryConfig;
    use std::time::Duration;

    fn fast_opts() -> ExecuteOptions {
        ExecuteOptions {
            jobs: 2,
            pipeline: PipelineOptions {
                retry: RetryConfig::fast(3),
                ready_timeout: Duration::from_millis(10),
            },
        }
    }

    fn healthy(adapter: &MockAdapter, ids: &[u32]) {
        for &id in ids {
            adapter.set_state(GuestId(id), Aspect::Health, AspectState::Matching);
        }
    }

    fn setup(specs: Vec<GuestSpec>) -> (Catalog, DependencyGraph, ExecutionPlan) {
        let catalog = Catalog::from_specs(specs).unwrap();
        let graph = DependencyGraph::build(&catalog).unwrap();
        let plan = planner::plan(&graph, &catalog).unwrap();
        (catalog, graph, plan)
    }

    fn run(
        adapter: &MockAdapter,
        catalog: &Catalog,
        graph: &DependencyGraph,
        plan: &ExecutionPlan,
    ) -> RunSummary {
        execute(
            adapter,
            catalog,
            graph,
            plan,
            &fast_opts(),
            &AtomicBool::new(false),
            &mut NoProgress,
        )
    }

    #[test]
    fn test_full_run_converges_everything() {
        let mut b = spec(101);
        b.depends_on = vec![GuestId(100)];
        let (catalog, graph, plan) = setup(vec![spec(100), b]);
        let adapter = MockAdapter::new();
        healthy(&adapter, &[100, 101]);

        let summary = run(&adapter, &catalog, &graph, &plan);
        assert!(summary.is_success());
        assert_eq!(summary.status(GuestId(100)), Some(&GuestStatus::Converged));
        assert_eq!(summary.status(GuestId(101)), Some(&GuestStatus::Converged));
    }

    #[test]
    fn test_converged_fleet_rerun_is_pure_inspection() {
        let (catalog, graph, plan) = setup(vec![spec(100), spec(101)]);
        let adapter = MockAdapter::converged(&[GuestId(100), GuestId(101)]);

        let summary = run(&adapter, &catalog, &graph, &plan);
        assert!(summary.is_success());
        assert_eq!(summary.status(GuestId(100)), Some(&GuestStatus::Unchanged));
        assert_eq!(adapter.total_apply_count(), 0);
    }

    #[test]
    fn test_failure_blocks_transitive_dependents() {
        // 100 <- 101 <- 102
        let mut b = spec(101);
        b.depends_on = vec![GuestId(100)];
        let mut c = spec(102);
        c.depends_on = vec![GuestId(101)];
        let (catalog, graph, plan) = setup(vec![spec(100), b, c]);

        let adapter = MockAdapter::new();
        healthy(&adapter, &[100, 101, 102]);
        adapter.fail_apply(
            GuestId(100),
            Aspect::Definition,
            vec![Scripted::Permanent("rejected".into())],
        );

        let summary = run(&adapter, &catalog, &graph, &plan);
        assert!(!summary.is_success());
        assert!(matches!(
            summary.status(GuestId(100)),
            Some(GuestStatus::Failed { .. })
        ));
        assert_eq!(
            summary.status(GuestId(101)),
            Some(&GuestStatus::Blocked { on: GuestId(100) })
        );
        assert_eq!(
            summary.status(GuestId(102)),
            Some(&GuestStatus::Blocked { on: GuestId(101) })
        );
        // Blocked guests were never touched.
        assert!(!adapter.touched(GuestId(101)));
        assert!(!adapter.touched(GuestId(102)));
    }

    #[test]
    fn test_partial_failure_isolation() {
        // X independent; Y <- Z chain. X fails, Y and Z still complete.
        let x = spec(1);
        let y = spec(2);
        let mut z = spec(3);
        z.depends_on = vec![GuestId(2)];
        let (catalog, graph, plan) = setup(vec![x, y, z]);

        let adapter = MockAdapter::new();
        healthy(&adapter, &[1, 2, 3]);
        adapter.fail_apply(
            GuestId(1),
            Aspect::Storage,
            vec![Scripted::Permanent("no space".into())],
        );

        let summary = run(&adapter, &catalog, &graph, &plan);
        assert!(matches!(
            summary.status(GuestId(1)),
            Some(GuestStatus::Failed { .. })
        ));
        assert_eq!(summary.status(GuestId(2)), Some(&GuestStatus::Converged));
        assert_eq!(summary.status(GuestId(3)), Some(&GuestStatus::Converged));
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.unsuccessful(), 1);
    }

    #[test]
    fn test_retry_scenario_three_attempts() {
        let (catalog, graph, plan) = setup(vec![spec(100)]);
        let adapter = MockAdapter::new();
        healthy(&adapter, &[100]);
        adapter.fail_apply(
            GuestId(100),
            Aspect::BaseConfig,
            vec![
                Scripted::Transient("busy".into()),
                Scripted::Transient("busy".into()),
            ],
        );

        let summary = run(&adapter, &catalog, &graph, &plan);
        assert!(summary.is_success());
        // Two failed attempts plus the success.
        let base_config_applies = adapter
            .calls()
            .iter()
            .filter(|c| matches!(c, crate::mock::Call::Apply(id, Aspect::BaseConfig) if *id == GuestId(100)))
            .count();
        assert_eq!(base_config_applies, 3);
    }

    #[test]
    fn test_cancelled_run_touches_nothing() {
        let (catalog, graph, plan) = setup(vec![spec(100), spec(101)]);
        let adapter = MockAdapter::new();

        let summary = execute(
            &adapter,
            &catalog,
            &graph,
            &plan,
            &fast_opts(),
            &AtomicBool::new(true),
            &mut NoProgress,
        );
        assert!(!summary.is_success());
        assert_eq!(summary.status(GuestId(100)), Some(&GuestStatus::Cancelled));
        assert_eq!(adapter.total_apply_count(), 0);
    }

    #[test]
    fn test_targeted_plan_never_touches_outsiders() {
        // A <- B <- C, D independent; converge(C) must not touch D.
        let mut b = spec(101);
        b.depends_on = vec![GuestId(100)];
        let mut c = spec(102);
        c.depends_on = vec![GuestId(101)];
        let catalog = Catalog::from_specs(vec![spec(100), b, c, spec(103)]).unwrap();
        let graph = DependencyGraph::build(&catalog).unwrap();
        let plan = planner::plan_targets(&graph, &catalog, &[GuestId(102)]).unwrap();

        let adapter = MockAdapter::new();
        healthy(&adapter, &[100, 101, 102]);
        let summary = run(&adapter, &catalog, &graph, &plan);

        assert!(summary.is_success());
        assert_eq!(summary.len(), 3);
        assert!(summary.status(GuestId(103)).is_none());
        assert!(!adapter.touched(GuestId(103)));
    }

    #[test]
    fn test_progress_reports_waves_and_completions() {
        struct Recording(Vec<String>);
        impl ProgressCallback for Recording {
            fn on_wave_start(&mut self, wave: usize, guests: &[GuestId]) {
                self.0.push(format!("wave {wave}: {} guests", guests.len()));
            }
            fn on_guest_complete(&mut self, id: GuestId, status: &GuestStatus) {
                self.0
                    .push(format!("done {id}: success={}", status.is_success()));
            }
        }

        let mut b = spec(101);
        b.depends_on = vec![GuestId(100)];
        let (catalog, graph, plan) = setup(vec![spec(100), b]);
        let adapter = MockAdapter::converged(&[GuestId(100), GuestId(101)]);

        let mut progress = Recording(Vec::new());
        execute(
            &adapter,
            &catalog,
            &graph,
            &plan,
            &fast_opts(),
            &AtomicBool::new(false),
            &mut progress,
        );
        assert_eq!(
            progress.0,
            vec![
                "wave 0: 1 guests",
                "done 100: success=true",
                "wave 1: 1 guests",
                "done 101: success=true",
            ]
        );
    }
}
