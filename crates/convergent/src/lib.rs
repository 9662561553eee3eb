//! # Convergent
//!
//! Dependency-resolution and convergence engine for a declared fleet of
//! virtualized guests (containers and VMs) on a single control node.
//!
//! The engine does three things:
//!
//! - builds a dependency graph from declared (`depends_on`) and implicit
//!   (`clone_from` template) relationships, rejecting cycles before anything
//!   runs;
//! - computes a deterministic execution plan (Kahn's algorithm with an
//!   `(order_hint, id)` tie-break) for the whole catalog or for a targeted
//!   set plus its dependency closure;
//! - drives each guest through an idempotent lifecycle state machine where
//!   every stage is inspect-compare-converge over one adapter aspect, so a
//!   re-run over a converged fleet performs inspections only.
//!
//! ## Core concepts
//!
//! - [`Catalog`]: immutable, validated desired state, loaded once per run
//! - [`DependencyGraph`] / [`ExecutionPlan`]: ordering with cycle rejection
//! - [`Stage`] / [`run_pipeline`]: the per-guest lifecycle state machine
//! - [`GuestAdapter`]: the only door to the target platform; typed
//!   [`AspectState`] results, mockable via [`mock::MockAdapter`]
//! - [`execute`]: wave scheduling over a bounded pool with partial-failure
//!   isolation and cancellation
//!
//! ## Example
//!
//! ```ignore
//! use convergent::{Catalog, DependencyGraph, ExecuteOptions, NoProgress};
//! use std::sync::atomic::AtomicBool;
//!
//! let catalog = Catalog::load(path)?;
//! let graph = DependencyGraph::build(&catalog)?;
//! let plan = convergent::plan(&graph, &catalog)?;
//!
//! let cancel = AtomicBool::new(false);
//! let summary = convergent::execute(
//!     &adapter, &catalog, &graph, &plan,
//!     &ExecuteOptions::default(), &cancel, &mut NoProgress,
//! );
//! assert!(summary.is_success());
//! ```

pub mod adapter;
pub mod catalog;
pub mod converge;
pub mod error;
pub mod executor;
pub mod graph;
pub mod lifecycle;
pub mod mock;
pub mod planner;
pub mod retry;

// Re-export main types at crate root
pub use adapter::{Aspect, AspectState, GuestAdapter};
pub use catalog::{Catalog, GuestConfig, GuestId, GuestKind, GuestSpec, NetworkConfig};
pub use converge::{converge_aspect, inspect_guest, Convergence};
pub use error::{Error, ErrorCategory, Result};
pub use executor::{
    execute, ExecuteOptions, GuestStatus, NoProgress, ProgressCallback, RunSummary,
};
pub use graph::DependencyGraph;
pub use lifecycle::{
    power_off, power_on, run_pipeline, GuestRun, PipelineOptions, Stage, StageReport,
};
pub use planner::{plan, plan_targets, ExecutionPlan};
pub use retry::{with_retry, RetryConfig};
