//! Error types shared by change providers and the engine

use thiserror::Error;

/// Domain failure reported by a change provider for one scope
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VcsError {
    /// Backend command or query failed
    #[error("vcs operation failed: {0}")]
    Failed(String),

    /// Backend could not be reached (server down, credentials, ...)
    #[error("vcs connection problem: {0}")]
    ConnectionProblem(String),

    /// Unexpected failure inside the provider (e.g. a caught panic)
    #[error("internal provider error: {0}")]
    Internal(String),
}

impl VcsError {
    /// Create a generic failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Marker returned when a cancellation handle has been triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Result of a provider call that did not complete normally
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    /// Cooperative cancellation; never recorded as a failure
    #[error("scan cancelled")]
    Cancelled,

    /// Provider reported a domain error for its scope
    #[error(transparent)]
    Vcs(#[from] VcsError),
}

impl From<Cancelled> for ScanError {
    fn from(_: Cancelled) -> Self {
        ScanError::Cancelled
    }
}
