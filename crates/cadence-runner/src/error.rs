//! Error types for code runners.

use std::time::Duration;

use thiserror::Error;

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Ways an invocation can fail before producing a result.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The payload raised an error or could not be executed.
    #[error("ExecutionError: {0}")]
    Execution(String),

    /// The execution budget was exceeded.
    #[error("TimeoutError: exceeded {}s budget", .0.as_secs())]
    Timeout(Duration),

    /// The runner process could not be spawned.
    #[error("Failed to spawn runner: {0}")]
    Spawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Whether this failure came from the time budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
