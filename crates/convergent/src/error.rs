//! Error types for the convergence engine.
//!
//! Errors are categorized to enable retry logic and to keep the abort
//! semantics explicit: configuration and cycle errors are raised before any
//! external mutation, per-guest runtime errors are isolated to one branch of
//! the dependency graph.

use crate::catalog::GuestId;
use std::path::PathBuf;
use thiserror::Error;

/// Categories of engine errors for retry and abort decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed desired state; raised before anything runs
    Config,
    /// Cycle in the dependency graph; raised before anything runs
    Cycle,
    /// Momentary external failure (timeouts, flaky commands); retryable
    Transient,
    /// Explicit rejection or invalid state from the target platform
    Permanent,
    /// Run was cancelled by the operator
    Cancelled,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Whether this error aborts the whole run before execution starts.
    pub fn is_pre_execution(&self) -> bool {
        matches!(self, Self::Config | Self::Cycle)
    }
}

/// Errors that can occur while planning or converging a fleet.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed desired state
    #[error("config error: {message}")]
    Config {
        /// What is wrong with the declaration
        message: String,
    },

    /// Two guests declared with the same id
    #[error("duplicate guest id: {id}")]
    DuplicateId {
        /// The id that appears more than once
        id: GuestId,
    },

    /// A dependency or clone reference points at a guest that is not declared
    #[error("guest {from} references undeclared guest {to}")]
    DanglingReference {
        /// The guest holding the reference
        from: GuestId,
        /// The missing referent
        to: GuestId,
    },

    /// A clone source must be declared as a template
    #[error("guest {from} clones from {to}, which is not a template")]
    NotATemplate {
        /// The cloning guest
        from: GuestId,
        /// The non-template clone source
        to: GuestId,
    },

    /// The dependency graph contains a cycle
    #[error("dependency cycle among guests: {}", format_ids(members))]
    DependencyCycle {
        /// All guests on a cycle, sorted
        members: Vec<GuestId>,
    },

    /// Momentary failure from the command adapter (retryable)
    #[error("transient error: {message}")]
    Transient {
        /// Detailed message from the failed operation
        message: String,
    },

    /// Guest did not become ready within the allowed window (retryable)
    #[error("guest {id} not ready after {seconds}s")]
    ReadyTimeout {
        /// The guest that was being waited on
        id: GuestId,
        /// How long was waited
        seconds: u64,
    },

    /// Explicit rejection or invalid-state response from the adapter
    #[error("permanent error: {message}")]
    Permanent {
        /// Detailed message from the failed operation
        message: String,
    },

    /// The run was cancelled
    #[error("cancelled")]
    Cancelled,

    /// Catalog file not found
    #[error("catalog not found: {0}")]
    CatalogNotFound(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

fn format_ids(ids: &[GuestId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config { .. }
            | Error::DuplicateId { .. }
            | Error::DanglingReference { .. }
            | Error::NotATemplate { .. }
            | Error::CatalogNotFound(_)
            | Error::Json(_) => ErrorCategory::Config,
            Error::DependencyCycle { .. } => ErrorCategory::Cycle,
            Error::Transient { .. } | Error::ReadyTimeout { .. } => ErrorCategory::Transient,
            Error::Permanent { .. } => ErrorCategory::Permanent,
            Error::Cancelled => ErrorCategory::Cancelled,
            Error::Io(_) | Error::Other(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether this error must abort the run before any mutation.
    pub fn is_pre_execution(&self) -> bool {
        self.category().is_pre_execution()
    }

    /// Convenience constructor for transient adapter failures.
    pub fn transient(message: impl Into<String>) -> Self {
        Error::Transient {
            message: message.into(),
        }
    }

    /// Convenience constructor for permanent adapter failures.
    pub fn permanent(message: impl Into<String>) -> Self {
        Error::Permanent {
            message: message.into(),
        }
    }

    /// Convenience constructor for configuration errors.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
