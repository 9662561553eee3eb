//! Recording, scriptable in-memory adapter.
//!
//! Used by the engine's own tests and by downstream crates that want to test
//! command wiring without a hypervisor. Every call is logged; aspect states
//! can be seeded per guest, and failures can be queued per operation to
//! exercise retry and partial-failure paths.

use crate::adapter::{Aspect, AspectState, GuestAdapter};
use crate::catalog::{GuestId, GuestSpec};
use crate::error::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One recorded adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Exists(GuestId),
    Inspect(GuestId, Aspect),
    Apply(GuestId, Aspect),
    Start(GuestId),
    Stop(GuestId),
    Delete(GuestId),
    WaitReady(GuestId),
}

/// A failure queued for a scripted operation.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Return a transient (retryable) error
    Transient(String),
    /// Return a permanent error
    Permanent(String),
}

impl Scripted {
    fn into_error(self) -> Error {
        match self {
            Scripted::Transient(message) => Error::Transient { message },
            Scripted::Permanent(message) => Error::Permanent { message },
        }
    }
}

#[derive(Default)]
struct Inner {
    states: HashMap<(GuestId, Aspect), AspectState>,
    pinned: HashMap<(GuestId, Aspect), bool>,
    apply_failures: HashMap<(GuestId, Aspect), VecDeque<Scripted>>,
    ready_failures: HashMap<GuestId, VecDeque<Scripted>>,
    calls: Vec<Call>,
}

/// In-memory [`GuestAdapter`] with scriptable state and a call log.
///
/// Default behavior: every aspect starts [`AspectState::Absent`]; `apply`
/// moves the aspect to [`AspectState::Matching`] (unless pinned); `start`
/// and `stop` move the power aspect; `wait_ready` succeeds immediately.
#[derive(Default)]
pub struct MockAdapter {
    inner: Mutex<Inner>,
}

impl MockAdapter {
    /// Create an empty adapter (all aspects absent).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an adapter where every aspect of the given guests already
    /// matches desired state - a fully converged platform.
    pub fn converged(ids: &[GuestId]) -> Self {
        let adapter = Self::new();
        for &id in ids {
            for aspect in Aspect::ALL {
                adapter.set_state(id, aspect, AspectState::Matching);
            }
        }
        adapter
    }

    /// Seed the state of one aspect.
    pub fn set_state(&self, id: GuestId, aspect: Aspect, state: AspectState) {
        self.lock().states.insert((id, aspect), state);
    }

    /// Make `apply` a no-op for one aspect (state stays as seeded).
    pub fn pin_state(&self, id: GuestId, aspect: Aspect) {
        self.lock().pinned.insert((id, aspect), true);
    }

    /// Queue failures for upcoming `apply` calls on one aspect; once the
    /// queue drains, `apply` succeeds normally.
    pub fn fail_apply(&self, id: GuestId, aspect: Aspect, failures: Vec<Scripted>) {
        self.lock()
            .apply_failures
            .entry((id, aspect))
            .or_default()
            .extend(failures);
    }

    /// Queue failures for upcoming `wait_ready` calls on one guest.
    pub fn fail_wait_ready(&self, id: GuestId, failures: Vec<Scripted>) {
        self.lock()
            .ready_failures
            .entry(id)
            .or_default()
            .extend(failures);
    }

    /// Full call log, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of `apply` calls recorded for one guest.
    pub fn apply_count(&self, id: GuestId) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Apply(g, _) if *g == id))
            .count()
    }

    /// Number of `apply` calls recorded across all guests.
    pub fn total_apply_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Apply(_, _)))
            .count()
    }

    /// Whether any call at all touched the given guest.
    pub fn touched(&self, id: GuestId) -> bool {
        self.lock().calls.iter().any(|c| {
            matches!(
                c,
                Call::Exists(g)
                    | Call::Inspect(g, _)
                    | Call::Apply(g, _)
                    | Call::Start(g)
                    | Call::Stop(g)
                    | Call::Delete(g)
                    | Call::WaitReady(g)
                    if *g == id
            )
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn state_of(inner: &Inner, id: GuestId, aspect: Aspect) -> AspectState {
        inner
            .states
            .get(&(id, aspect))
            .cloned()
            .unwrap_or(AspectState::Absent)
    }
}

impl GuestAdapter for MockAdapter {
    fn exists(&self, id: GuestId) -> Result<bool> {
        let mut inner = self.lock();
        inner.calls.push(Call::Exists(id));
        Ok(!Self::state_of(&inner, id, Aspect::Definition).is_absent())
    }

    fn inspect(&self, id: GuestId, aspect: Aspect, _desired: &GuestSpec) -> Result<AspectState> {
        let mut inner = self.lock();
        inner.calls.push(Call::Inspect(id, aspect));
        Ok(Self::state_of(&inner, id, aspect))
    }

    fn apply(&self, id: GuestId, aspect: Aspect, _desired: &GuestSpec) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.push(Call::Apply(id, aspect));
        if let Some(queue) = inner.apply_failures.get_mut(&(id, aspect))
            && let Some(failure) = queue.pop_front()
        {
            return Err(failure.into_error());
        }
        if !inner.pinned.get(&(id, aspect)).copied().unwrap_or(false) {
            inner.states.insert((id, aspect), AspectState::Matching);
        }
        Ok(())
    }

    fn start(&self, id: GuestId) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.push(Call::Start(id));
        inner.states.insert((id, Aspect::Power), AspectState::Matching);
        Ok(())
    }

    fn stop(&self, id: GuestId) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.push(Call::Stop(id));
        inner.states.insert(
            (id, Aspect::Power),
            AspectState::Divergent {
                detail: "stopped".to_string(),
            },
        );
        Ok(())
    }

    fn delete(&self, id: GuestId) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.push(Call::Delete(id));
        for aspect in Aspect::ALL {
            inner.states.insert((id, aspect), AspectState::Absent);
        }
        Ok(())
    }

    fn wait_ready(&self, id: GuestId, _timeout: Duration, cancel: &AtomicBool) -> Result<()> {
        if cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        let mut inner = self.lock();
        inner.calls.push(Call::WaitReady(id));
        if let Some(queue) = inner.ready_failures.get_mut(&id)
            && let Some(failure) = queue.pop_front()
        {
            return Err(failure.into_error());
        }
        Ok(())
    }
}
