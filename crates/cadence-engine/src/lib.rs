//! Cadence engine: runs persisted multi-step tasks on schedules.
//!
//! - [`StepExecutor`]: the task/step state machine
//! - [`TimerDispatcher`]: fires due schedules and resumes waiting tasks
//! - [`ExecutionLog`]: the append-only record of run attempts
//! - [`TaskManager`]: the facade hosts talk to

pub mod dispatcher;
pub mod error;
pub mod execution_log;
pub mod executor;
pub mod manager;
pub mod pagination;

pub use dispatcher::{
    DEFAULT_ASYNC_TIMEOUT, DEFAULT_TICK_INTERVAL, DispatcherConfig, DispatcherHandle, TickReport,
    TimerDispatcher,
};
pub use error::{EngineError, Result};
pub use execution_log::ExecutionLog;
pub use executor::{
    CompletionOutcome, DISCARDED_RESULT, DispatchOutcome, RunNowOutcome, StepExecutor,
};
pub use manager::{
    ExecutionEntry, ScheduledTask, StepConfig, TaskManager, TaskManagerConfig, TaskStatusReport,
    TaskSummary,
};
pub use pagination::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, Page, PageRequest};
