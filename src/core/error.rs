//! Error types for scheduler operations.

use std::time::Duration;

use thiserror::Error;

use crate::util::ItemKeyError;

/// Errors returned synchronously by the scheduler façade.
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    /// No registered plugin answers this item key.
    #[error("unknown metric {0}")]
    UnknownItem(String),
    /// The item key could not be parsed.
    #[error("invalid item key: {0}")]
    InvalidItemKey(#[from] ItemKeyError),
    /// Registration or configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The task handle does not refer to a live task.
    #[error("unknown task {0}")]
    UnknownTask(u64),
    /// The manager has not been started yet.
    #[error("scheduler is not running")]
    NotRunning,
    /// The manager is stopping or stopped.
    #[error("scheduler is shutting down")]
    ShuttingDown,
    /// A direct check did not complete before its deadline.
    #[error("timeout while checking {item} after {after:?}")]
    Timeout {
        /// Item key that was being checked.
        item: String,
        /// Time the caller waited.
        after: Duration,
    },
    /// A direct check completed with a plugin-level failure.
    #[error("cannot check {item}: {source}")]
    Execution {
        /// Item key that was being checked.
        item: String,
        /// What went wrong.
        source: ExecutionError,
    },
    /// Runtime-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Failure of a single execution. These are data carried in a result, never
/// process-level faults.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The plugin returned an error.
    #[error("{0}")]
    Plugin(String),
    /// The plugin call exceeded its execution timeout and was abandoned.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The plugin panicked; the panic was contained to this execution.
    #[error("plugin panicked: {0}")]
    Panicked(String),
    /// The execution was abandoned because the scheduler stopped.
    #[error("cancelled by shutdown")]
    Cancelled,
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
