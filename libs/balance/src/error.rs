//! Error types for planning and execution.

use std::time::Duration;

use thiserror::Error;

/// Result type for planning and balancing operations.
pub type BalanceResult<T> = Result<T, BalanceError>;

/// Errors raised while planning or orchestrating a balance run.
#[derive(Debug, Error)]
pub enum BalanceError {
    /// The non-excluded hosts have no memory capacity to balance onto,
    /// typically because every host was excluded.
    #[error("no memory capacity left on non-excluded hosts ({excluded} of {hosts} hosts excluded)")]
    NoCapacity { hosts: usize, excluded: usize },

    /// Reading the cluster snapshot failed.
    #[error("failed to read cluster snapshot: {0}")]
    Snapshot(#[source] BackendError),

    #[error(transparent)]
    Execute(#[from] ExecuteError),
}

/// Errors raised by the execution scheduler.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The backend rejected a submission or a status query failed.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// No in-flight migration finished within the stall timeout.
    #[error("timeout after {elapsed:?} waiting for {in_flight} in-flight migrations")]
    Stalled { elapsed: Duration, in_flight: usize },

    /// Shutdown was requested before the plan was drained.
    #[error("cancelled with {pending} pending and {in_flight} in-flight migrations")]
    Cancelled { pending: usize, in_flight: usize },
}

/// Errors surfaced by a cluster backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected response: {0}")]
    Response(String),

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request(message.into())
    }

    pub fn response(message: impl Into<String>) -> Self {
        Self::Response(message.into())
    }
}
