//! Command adapter - the abstract surface between the engine and the target
//! platform.
//!
//! The engine never embeds platform-specific logic; every inspection and
//! mutation goes through [`GuestAdapter`]. Implementations shell out to the
//! real hypervisor tooling (and own all the output parsing), or record calls
//! in tests. All results are typed: the core compares [`AspectState`] values,
//! never command output text.

use crate::catalog::{GuestId, GuestSpec};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// One independently convergeable facet of a guest. Each lifecycle stage
/// inspects and corrects exactly one aspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aspect {
    /// The guest definition itself (created or cloned)
    Definition,
    /// Hostname and network configuration
    BaseConfig,
    /// Root volume attachment and size
    Storage,
    /// CPU and memory allocation
    Sizing,
    /// Power state
    Power,
    /// Installed feature set
    Features,
    /// In-guest health probe
    Health,
    /// Converged snapshot marker
    Snapshot,
}

impl Aspect {
    /// Every aspect, in lifecycle order.
    pub const ALL: [Aspect; 8] = [
        Aspect::Definition,
        Aspect::BaseConfig,
        Aspect::Storage,
        Aspect::Sizing,
        Aspect::Power,
        Aspect::Features,
        Aspect::Health,
        Aspect::Snapshot,
    ];

    /// Name used in logs and status output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Aspect::Definition => "definition",
            Aspect::BaseConfig => "base_config",
            Aspect::Storage => "storage",
            Aspect::Sizing => "sizing",
            Aspect::Power => "power",
            Aspect::Features => "features",
            Aspect::Health => "health",
            Aspect::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed inspection result for one aspect of one guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectState {
    /// The aspect does not exist at all (guest undefined, no snapshot, ...)
    Absent,
    /// The aspect matches the desired configuration
    Matching,
    /// The aspect exists but differs from the desired configuration
    Divergent {
        /// Human-readable summary of the difference
        detail: String,
    },
}

impl AspectState {
    /// Whether the aspect already matches desired state.
    pub fn is_matching(&self) -> bool {
        matches!(self, Self::Matching)
    }

    /// Whether the aspect is entirely absent.
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// Abstract capability interface to the target platform.
///
/// Implementations must be safe for concurrent use across distinct guest ids;
/// the executor never issues concurrent calls for the same id.
pub trait GuestAdapter: Send + Sync {
    /// Whether the guest is defined on the platform at all.
    fn exists(&self, id: GuestId) -> Result<bool>;

    /// Inspect the current external state of one aspect and compare it to
    /// the desired configuration.
    ///
    /// The engine never interprets the configuration payload itself; the
    /// adapter owns the comparison and reports a typed verdict. Must
    /// re-derive state from the platform on every call; the engine relies on
    /// this to stay correct across interrupted runs.
    fn inspect(&self, id: GuestId, aspect: Aspect, desired: &GuestSpec) -> Result<AspectState>;

    /// Apply the minimal corrective action for one aspect.
    fn apply(&self, id: GuestId, aspect: Aspect, desired: &GuestSpec) -> Result<()>;

    /// Start the guest.
    fn start(&self, id: GuestId) -> Result<()>;

    /// Stop the guest.
    fn stop(&self, id: GuestId) -> Result<()>;

    /// Destroy the guest definition.
    fn delete(&self, id: GuestId) -> Result<()>;

    /// Block until the guest is responsive, up to `timeout`.
    ///
    /// Must return a transient error on timeout (never block indefinitely)
    /// and must return [`crate::Error::Cancelled`] promptly once `cancel`
    /// is raised.
    fn wait_ready(&self, id: GuestId, timeout: Duration, cancel: &AtomicBool) -> Result<()>;
}
