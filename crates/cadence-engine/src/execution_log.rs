//! Append-only record of run attempts.

use std::sync::Arc;

use cadence_store::TaskStore;
use cadence_types::{Execution, ExecutionStatus, Id, Timestamp};
use tracing::{debug, info};

use crate::error::Result;

/// Facade over the execution rows in the store.
///
/// `finish` only moves a non-terminal execution, so a duplicated completion
/// cannot rewrite a result that is already recorded.
#[derive(Debug, Clone)]
pub struct ExecutionLog {
    store: Arc<TaskStore>,
}

impl ExecutionLog {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self { store }
    }

    /// Open a `running` execution for a task, optionally tied to a step.
    pub fn start(&self, task_id: &str, step_id: Option<&str>, now: Timestamp) -> Result<Id> {
        let execution = self.store.insert_execution(task_id, step_id, now)?;
        debug!(
            task_id = %task_id,
            execution_id = %execution.id,
            step_id = step_id.unwrap_or("-"),
            "Execution started"
        );
        Ok(execution.id)
    }

    /// Append text to an open execution. Ignored once the execution is terminal.
    pub fn append_log(&self, execution_id: &str, text: &str, now: Timestamp) -> Result<()> {
        if !self.store.append_execution_log(execution_id, text, now)? {
            debug!(execution_id = %execution_id, "Ignoring log append on finished execution");
        }
        Ok(())
    }

    /// Close an execution. Returns `false` if it was already closed.
    pub fn finish(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        result: Option<&str>,
        now: Timestamp,
    ) -> Result<bool> {
        let changed = self
            .store
            .finish_execution(execution_id, status, result, now)?;
        if changed {
            info!(execution_id = %execution_id, status = %status, "Execution finished");
        } else {
            debug!(execution_id = %execution_id, "Execution already finished; ignoring");
        }
        Ok(changed)
    }

    /// Executions for a task, newest first.
    pub fn list(&self, task_id: &str, limit: usize) -> Result<Vec<Execution>> {
        Ok(self.store.list_executions(task_id, limit)?)
    }

    /// The execution still open for a step, if any.
    pub fn open_for_step(&self, step_id: &str) -> Result<Option<Execution>> {
        Ok(self.store.open_execution_for_step(step_id)?)
    }
}
