//! Error taxonomy for a single unit of work.

use std::time::Duration;

/// The error type produced by a work callable.
///
/// Callables return whatever error they like; the engine carries it through
/// unchanged so consumers always see the underlying cause.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What went wrong while executing one work item invocation.
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    /// The callable returned an error. The original cause is carried as-is.
    #[error("{0}")]
    Failed(#[from] BoxError),

    /// The wait for the callable expired. The underlying task is not
    /// cancelled; only the wait is.
    #[error("work timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The callable's task panicked or was aborted.
    #[error("work task panicked: {0}")]
    Panicked(String),

    /// An invocation was requested while one is already in flight.
    #[error("work item is already running")]
    Busy,
}

impl WorkError {
    /// Whether this error is a timeout rather than a failure of the work
    /// itself.
    pub fn is_timeout(&self) -> bool {
        matches!(self, WorkError::Timeout { .. })
    }
}
