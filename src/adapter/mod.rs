//! Platform adapters - the only code that talks to hypervisor tooling.

mod pct;

pub use pct::PctAdapter;
