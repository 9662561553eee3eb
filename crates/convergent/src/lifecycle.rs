//! Per-guest lifecycle state machine.
//!
//! A guest advances through a fixed, linear sequence of stages; each stage is
//! one inspect-compare-converge step over a single adapter aspect, so the
//! whole pipeline is idempotent: re-running it on an already converged guest
//! performs inspections only. Any stage can fail the guest instead of
//! advancing; there is no rollback, the next run simply converges forward.

use crate::adapter::{Aspect, AspectState, GuestAdapter};
use crate::catalog::{GuestId, GuestSpec};
use crate::converge::{converge_aspect, Convergence};
use crate::error::{Error, Result};
use crate::retry::{with_retry, RetryConfig};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Lifecycle stage of a guest. Linear except for the terminal failure state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Initial state; nothing has been inspected yet
    Unvalidated,
    /// Guest definition exists (created or cloned from template)
    Defined,
    /// Hostname and network applied
    BaseConfigured,
    /// Root volume attached and sized
    StorageAttached,
    /// CPU and memory allocation enforced
    SizeEnforced,
    /// Guest running and responsive
    Started,
    /// Effective feature set installed
    FeaturesApplied,
    /// Health probe passed
    Validated,
    /// Converged snapshot taken; terminal success state
    Snapshotted,
    /// Terminal failure state
    Failed,
}

impl Stage {
    /// The stage that follows on success, or None for terminal states.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Unvalidated => Some(Stage::Defined),
            Stage::Defined => Some(Stage::BaseConfigured),
            Stage::BaseConfigured => Some(Stage::StorageAttached),
            Stage::StorageAttached => Some(Stage::SizeEnforced),
            Stage::SizeEnforced => Some(Stage::Started),
            Stage::Started => Some(Stage::FeaturesApplied),
            Stage::FeaturesApplied => Some(Stage::Validated),
            Stage::Validated => Some(Stage::Snapshotted),
            Stage::Snapshotted | Stage::Failed => None,
        }
    }

    /// The adapter aspect this stage converges, if any.
    pub fn aspect(&self) -> Option<Aspect> {
        match self {
            Stage::Unvalidated | Stage::Failed => None,
            Stage::Defined => Some(Aspect::Definition),
            Stage::BaseConfigured => Some(Aspect::BaseConfig),
            Stage::StorageAttached => Some(Aspect::Storage),
            Stage::SizeEnforced => Some(Aspect::Sizing),
            Stage::Started => Some(Aspect::Power),
            Stage::FeaturesApplied => Some(Aspect::Features),
            Stage::Validated => Some(Aspect::Health),
            Stage::Snapshotted => Some(Aspect::Snapshot),
        }
    }

    /// Whether this stage is terminal (success or failure).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Snapshotted | Stage::Failed)
    }

    /// Name used in logs and result output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Unvalidated => "unvalidated",
            Stage::Defined => "defined",
            Stage::BaseConfigured => "base_configured",
            Stage::StorageAttached => "storage_attached",
            Stage::SizeEnforced => "size_enforced",
            Stage::Started => "started",
            Stage::FeaturesApplied => "features_applied",
            Stage::Validated => "validated",
            Stage::Snapshotted => "snapshotted",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Options controlling the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Retry policy for transient stage failures
    pub retry: RetryConfig,
    /// How long a started guest may take to become responsive
    pub ready_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            ready_timeout: Duration::from_secs(120),
        }
    }
}

/// Record of one executed stage.
#[derive(Debug, Clone)]
pub struct StageReport {
    /// Which stage ran
    pub stage: Stage,
    /// Whether a corrective action was applied
    pub changed: bool,
    /// Attempts the stage needed (1 when it succeeded first try)
    pub attempts: u32,
}

/// Result of driving one guest through the pipeline.
#[derive(Debug)]
pub struct GuestRun {
    /// The guest that ran
    pub id: GuestId,
    /// Final lifecycle state
    pub state: Stage,
    /// Per-stage records, in execution order
    pub reports: Vec<StageReport>,
    /// The error that moved the guest to `Failed`, if any
    pub error: Option<Error>,
}

impl GuestRun {
    /// Whether any stage performed a mutation.
    pub fn changed(&self) -> bool {
        self.reports.iter().any(|r| r.changed)
    }

    /// Whether the guest reached the terminal success state.
    pub fn is_converged(&self) -> bool {
        self.state == Stage::Snapshotted
    }
}

/// Drive one guest through the full lifecycle pipeline.
///
/// Each stage retries transient errors per `opts.retry`; a permanent error
/// or retry exhaustion moves the guest to [`Stage::Failed`] and halts the
/// pipeline. Cancellation is observed between stages.
pub fn run_pipeline(
    adapter: &dyn GuestAdapter,
    spec: &GuestSpec,
    opts: &PipelineOptions,
    cancel: &AtomicBool,
) -> GuestRun {
    let mut state = Stage::Unvalidated;
    let mut reports = Vec::new();

    while let Some(stage) = state.next() {
        if cancel.load(Ordering::Relaxed) {
            return GuestRun {
                id: spec.id,
                state,
                reports,
                error: Some(Error::Cancelled),
            };
        }

        match run_stage(adapter, spec, stage, opts, cancel) {
            Ok(report) => {
                debug!(
                    "guest {}: stage {stage} done (changed: {}, attempts: {})",
                    spec.id, report.changed, report.attempts
                );
                reports.push(report);
                state = stage;
            }
            Err(e) => {
                info!("guest {}: stage {stage} failed: {e}", spec.id);
                return GuestRun {
                    id: spec.id,
                    state: Stage::Failed,
                    reports,
                    error: Some(e),
                };
            }
        }
    }

    GuestRun {
        id: spec.id,
        state,
        reports,
        error: None,
    }
}

fn run_stage(
    adapter: &dyn GuestAdapter,
    spec: &GuestSpec,
    stage: Stage,
    opts: &PipelineOptions,
    cancel: &AtomicBool,
) -> Result<StageReport> {
    let (outcome, attempts) = match stage {
        Stage::Started => with_retry(&opts.retry, cancel, || {
            converge_power_on(adapter, spec, opts.ready_timeout, cancel)
        })?,
        Stage::Validated => with_retry(&opts.retry, cancel, || check_health(adapter, spec))?,
        _ => {
            let aspect = stage
                .aspect()
                .ok_or_else(|| Error::Other(format!("stage {stage} has no aspect")))?;
            with_retry(&opts.retry, cancel, || converge_aspect(adapter, spec, aspect))?
        }
    };

    Ok(StageReport {
        stage,
        changed: outcome.changed(),
        attempts,
    })
}

/// Power-on convergence: start only when not already running, then wait for
/// the guest to answer. A ready-wait timeout is transient so it goes back
/// through the retry loop rather than failing outright.
fn converge_power_on(
    adapter: &dyn GuestAdapter,
    spec: &GuestSpec,
    ready_timeout: Duration,
    cancel: &AtomicBool,
) -> Result<Convergence> {
    let current = adapter.inspect(spec.id, Aspect::Power, spec)?;
    if current.is_matching() {
        debug!("guest {}: already running", spec.id);
        return Ok(Convergence::AlreadyConverged);
    }

    adapter.start(spec.id)?;
    adapter.wait_ready(spec.id, ready_timeout, cancel)?;

    let confirmed = adapter.inspect(spec.id, Aspect::Power, spec)?;
    if confirmed.is_matching() {
        Ok(Convergence::Changed)
    } else {
        Err(Error::permanent(format!(
            "guest {}: not running after start",
            spec.id
        )))
    }
}

/// Health validation is inspect-only: there is no corrective action to apply.
/// An unhealthy probe is transient (services may still be warming up) and is
/// retried; retry exhaustion fails the guest.
fn check_health(adapter: &dyn GuestAdapter, spec: &GuestSpec) -> Result<Convergence> {
    match adapter.inspect(spec.id, Aspect::Health, spec)? {
        AspectState::Matching => Ok(Convergence::AlreadyConverged),
        AspectState::Absent => Err(Error::permanent(format!(
            "guest {}: no health probe available",
            spec.id
        ))),
        AspectState::Divergent { detail } => Err(Error::transient(format!(
            "guest {}: unhealthy: {detail}",
            spec.id
        ))),
    }
}

/// Stop a guest if it is running. Used by the power command surface; walks
/// no lifecycle stages and never touches configuration aspects.
pub fn power_off(
    adapter: &dyn GuestAdapter,
    spec: &GuestSpec,
    retry: &RetryConfig,
    cancel: &AtomicBool,
) -> Result<bool> {
    let (changed, _attempts) = with_retry(retry, cancel, || {
        let current = adapter.inspect(spec.id, Aspect::Power, spec)?;
        if current.is_matching() {
            adapter.stop(spec.id)?;
            Ok(true)
        } else {
            Ok(false)
        }
    })?;
    Ok(changed)
}

/// Start a guest and wait for readiness, skipping when already running.
pub fn power_on(
    adapter: &dyn GuestAdapter,
    spec: &GuestSpec,
    opts: &PipelineOptions,
    cancel: &AtomicBool,
) -> Result<bool> {
    let (outcome, _attempts) = with_retry(&opts.retry, cancel, || {
        converge_power_on(adapter, spec, opts.ready_timeout, cancel)
    })?;
    Ok(outcome.changed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::spec;
    use crate::mock::{Call, MockAdapter, Scripted};

    fn opts() -> PipelineOptions {
        PipelineOptions {
            retry: RetryConfig::fast(3),
            ready_timeout: Duration::from_millis(10),
        }
    }

    fn no_cancel() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[test]
    fn test_fresh_guest_runs_every_stage() {
        let adapter = MockAdapter::new();
        let guest = spec(100);
        // Health probes cannot be converged; seed a passing probe.
        adapter.set_state(guest.id, Aspect::Health, crate::AspectState::Matching);

        let run = run_pipeline(&adapter, &guest, &opts(), &no_cancel());
        assert!(run.is_converged(), "run failed: {:?}", run.error);
        assert!(run.changed());
        // Six aspects applied (health is inspect-only, power uses start).
        assert_eq!(adapter.apply_count(guest.id), 6);
        assert!(adapter.calls().contains(&Call::Start(guest.id)));
        assert!(adapter.calls().contains(&Call::WaitReady(guest.id)));
    }

    #[test]
    fn test_converged_guest_is_pure_inspection() {
        let guest = spec(100);
        let adapter = MockAdapter::converged(&[guest.id]);

        let run = run_pipeline(&adapter, &guest, &opts(), &no_cancel());
        assert!(run.is_converged());
        assert!(!run.changed());
        assert_eq!(adapter.total_apply_count(), 0);
        assert!(!adapter.calls().contains(&Call::Start(guest.id)));
    }

    #[test]
    fn test_transient_failure_retried_to_success() {
        let adapter = MockAdapter::new();
        let guest = spec(100);
        adapter.set_state(guest.id, Aspect::Health, crate::AspectState::Matching);
        adapter.fail_apply(
            guest.id,
            Aspect::Features,
            vec![
                Scripted::Transient("mirror down".into()),
                Scripted::Transient("mirror down".into()),
            ],
        );

        let run = run_pipeline(&adapter, &guest, &opts(), &no_cancel());
        assert!(run.is_converged(), "run failed: {:?}", run.error);
        let features = run
            .reports
            .iter()
            .find(|r| r.stage == Stage::FeaturesApplied)
            .unwrap();
        assert_eq!(features.attempts, 3);
    }

    #[test]
    fn test_permanent_failure_halts_pipeline() {
        let adapter = MockAdapter::new();
        let guest = spec(100);
        adapter.fail_apply(
            guest.id,
            Aspect::Storage,
            vec![Scripted::Permanent("volume group full".into())],
        );

        let run = run_pipeline(&adapter, &guest, &opts(), &no_cancel());
        assert_eq!(run.state, Stage::Failed);
        assert!(matches!(run.error, Some(Error::Permanent { .. })));
        // Pipeline halted: nothing past storage was touched.
        assert!(!adapter.calls().contains(&Call::Apply(guest.id, Aspect::Sizing)));
        assert!(!adapter.calls().contains(&Call::Start(guest.id)));
    }

    #[test]
    fn test_retry_exhaustion_fails_guest() {
        let adapter = MockAdapter::new();
        let guest = spec(100);
        adapter.fail_apply(
            guest.id,
            Aspect::Definition,
            vec![
                Scripted::Transient("lock held".into()),
                Scripted::Transient("lock held".into()),
                Scripted::Transient("lock held".into()),
            ],
        );

        let run = run_pipeline(&adapter, &guest, &opts(), &no_cancel());
        assert_eq!(run.state, Stage::Failed);
        assert!(matches!(run.error, Some(Error::Transient { .. })));
    }

    #[test]
    fn test_unhealthy_guest_retried_then_failed() {
        let adapter = MockAdapter::new();
        let guest = spec(100);
        adapter.set_state(
            guest.id,
            Aspect::Health,
            crate::AspectState::Divergent {
                detail: "api not answering".into(),
            },
        );

        let run = run_pipeline(&adapter, &guest, &opts(), &no_cancel());
        assert_eq!(run.state, Stage::Failed);
        // Never reached the snapshot stage.
        assert!(!adapter.calls().contains(&Call::Apply(guest.id, Aspect::Snapshot)));
    }

    #[test]
    fn test_cancellation_stops_before_first_stage() {
        let adapter = MockAdapter::new();
        let guest = spec(100);
        let cancel = AtomicBool::new(true);

        let run = run_pipeline(&adapter, &guest, &opts(), &cancel);
        assert!(matches!(run.error, Some(Error::Cancelled)));
        assert_eq!(adapter.total_apply_count(), 0);
    }

    #[test]
    fn test_ready_timeout_is_retried() {
        let adapter = MockAdapter::new();
        let guest = spec(100);
        adapter.set_state(guest.id, Aspect::Health, crate::AspectState::Matching);
        adapter.fail_wait_ready(
            guest.id,
            vec![Scripted::Transient("not ready after 10ms".into())],
        );

        let run = run_pipeline(&adapter, &guest, &opts(), &no_cancel());
        assert!(run.is_converged(), "run failed: {:?}", run.error);
        let started = run
            .reports
            .iter()
            .find(|r| r.stage == Stage::Started)
            .unwrap();
        assert_eq!(started.attempts, 2);
    }

    #[test]
    fn test_power_off_only_when_running() {
        let adapter = MockAdapter::new();
        let guest = spec(1);
        let retry = RetryConfig::no_retry();
        // Not running: no stop issued.
        assert!(!power_off(&adapter, &guest, &retry, &no_cancel()).unwrap());
        assert!(!adapter.calls().contains(&Call::Stop(guest.id)));

        adapter.set_state(guest.id, Aspect::Power, crate::AspectState::Matching);
        assert!(power_off(&adapter, &guest, &retry, &no_cancel()).unwrap());
        assert!(adapter.calls().contains(&Call::Stop(guest.id)));
    }

    #[test]
    fn test_stage_sequence_is_linear() {
        let mut stage = Stage::Unvalidated;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            stage = next;
            seen.push(stage);
        }
        assert_eq!(stage, Stage::Snapshotted);
        assert_eq!(seen.len(), 9);
        assert!(Stage::Failed.next().is_none());
    }
}
