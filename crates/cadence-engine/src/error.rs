//! Engine error taxonomy.

use cadence_runner::RunnerError;
use cadence_store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the task manager and step executor.
///
/// `Execution` and `Timeout` describe step failures. The executor records
/// them on the task instead of returning them, so callers mostly see the
/// other three.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("ValidationError: {0}")]
    Validation(String),

    #[error("NotFoundError: {kind} {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("ExecutionError: {0}")]
    Execution(String),

    #[error("TimeoutError: {0}")]
    Timeout(String),

    #[error("PersistenceError: {0}")]
    Persistence(StoreError),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => Self::NotFound { kind, id },
            StoreError::Validation(msg) => Self::Validation(msg),
            other => Self::Persistence(other),
        }
    }
}

impl From<RunnerError> for EngineError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::Timeout(budget) => {
                Self::Timeout(format!("exceeded {}s budget", budget.as_secs()))
            }
            RunnerError::Execution(msg) => Self::Execution(msg),
            other => Self::Execution(other.to_string()),
        }
    }
}
