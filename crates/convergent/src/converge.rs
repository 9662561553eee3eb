//! Single-aspect convergence primitive: inspect, compare, apply, re-inspect.
//!
//! This is the layer every lifecycle stage goes through. It never assumes
//! prior success: current state is re-derived from the platform on every
//! invocation, so an interrupted run resumes correctly. The only side effect
//! is the one corrective action needed to close the inspected gap.

use crate::adapter::{Aspect, AspectState, GuestAdapter};
use crate::catalog::GuestSpec;
use crate::error::{Error, Result};
use log::{debug, info};

/// Outcome of converging one aspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    /// Already matching; no side effect was performed
    AlreadyConverged,
    /// A corrective action was applied and confirmed
    Changed,
}

impl Convergence {
    /// Whether a mutation was performed.
    pub fn changed(&self) -> bool {
        matches!(self, Self::Changed)
    }
}

/// Converge one aspect of one guest to its desired configuration.
///
/// Matching state is a pure no-op (logged only). Otherwise the adapter's
/// single corrective `apply` runs and the aspect is re-inspected to confirm;
/// an aspect still divergent after apply is a permanent error.
pub fn converge_aspect(
    adapter: &dyn GuestAdapter,
    spec: &GuestSpec,
    aspect: Aspect,
) -> Result<Convergence> {
    let current = adapter.inspect(spec.id, aspect, spec)?;
    match current {
        AspectState::Matching => {
            debug!("guest {}: {aspect} already converged", spec.id);
            return Ok(Convergence::AlreadyConverged);
        }
        AspectState::Absent => {
            info!("guest {}: {aspect} absent, creating", spec.id);
        }
        AspectState::Divergent { ref detail } => {
            info!("guest {}: {aspect} divergent ({detail}), correcting", spec.id);
        }
    }

    adapter.apply(spec.id, aspect, spec)?;

    let confirmed = adapter.inspect(spec.id, aspect, spec)?;
    match confirmed {
        AspectState::Matching => Ok(Convergence::Changed),
        AspectState::Absent => Err(Error::permanent(format!(
            "guest {}: {aspect} still absent after apply",
            spec.id
        ))),
        AspectState::Divergent { detail } => Err(Error::permanent(format!(
            "guest {}: {aspect} still divergent after apply: {detail}",
            spec.id
        ))),
    }
}

/// Inspect every aspect of a guest without mutating anything.
///
/// Backs the dry-run and status surfaces: the returned list pairs each aspect
/// with its current state, in lifecycle order.
pub fn inspect_guest(
    adapter: &dyn GuestAdapter,
    spec: &GuestSpec,
) -> Result<Vec<(Aspect, AspectState)>> {
    Aspect::ALL
        .iter()
        .map(|&aspect| Ok((aspect, adapter.inspect(spec.id, aspect, spec)?)))
        .collect()
}
