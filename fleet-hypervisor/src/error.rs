//! Error types for hypervisor client calls.

use thiserror::Error;

/// Failures a hypervisor client can report.
///
/// Every variant is terminal for the operation that triggered the call;
/// the orchestrator records it and never retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HypervisorError {
    /// The pool master could not be reached.
    #[error("pool unreachable: {0}")]
    Unreachable(String),

    /// The referenced VM, network, host or template does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The hypervisor refused the request.
    #[error("remote rejected: {0}")]
    RemoteRejected(String),
}

/// Result type alias for hypervisor calls.
pub type Result<T> = std::result::Result<T, HypervisorError>;
