//! The task state machine.
//!
//! Task: `pending → running → {completed, failed}`, `cancelled` from any
//! non-terminal state. Step: `pending → running → {completed, failed}`.
//!
//! Every transition goes through one async gate, so there is a single
//! writer even when the dispatcher loop and a caller race.

use std::sync::Arc;

use cadence_runner::{CodeRunner, Invocation, SyncResult};
use cadence_store::TaskStore;
use cadence_types::{ExecutionStatus, Id, StepStatus, Task, TaskStatus, Timestamp, add_secs};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::execution_log::ExecutionLog;

/// Result text recorded when a completion arrives for a cancelled task.
pub const DISCARDED_RESULT: &str = "result discarded: task cancelled";

/// What happened to a delivered completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The result was applied and the task advanced as far as it could.
    Applied(Task),
    /// The task was cancelled; the result was dropped.
    Discarded,
    /// Unknown, stale or already-consumed token.
    Ignored,
}

/// What a schedule dispatch did with its task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Started(Task),
    /// A previous occurrence is still in flight.
    SkippedRunning,
    SkippedCancelled,
}

/// Result of forcing a task to run outside its schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunNowOutcome {
    /// A fresh run was started.
    Started(Task),
    /// A running task was advanced past its step delay.
    Resumed(Task),
    /// The current step is waiting on an async completion; nothing to do.
    AwaitingCompletion(Task),
}

impl RunNowOutcome {
    pub fn task(&self) -> &Task {
        match self {
            Self::Started(t) | Self::Resumed(t) | Self::AwaitingCompletion(t) => t,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Started(t) => format!("task {} started ({})", t.id, t.status),
            Self::Resumed(t) => format!("task {} resumed ({})", t.id, t.status),
            Self::AwaitingCompletion(t) => {
                format!("task {} is awaiting an async completion", t.id)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Continue,
    Stop,
}

/// Advances tasks step by step.
pub struct StepExecutor {
    store: Arc<TaskStore>,
    runner: Arc<dyn CodeRunner>,
    log: ExecutionLog,
    gate: Mutex<()>,
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor").finish_non_exhaustive()
    }
}

impl StepExecutor {
    pub fn new(store: Arc<TaskStore>, runner: Arc<dyn CodeRunner>) -> Self {
        Self {
            log: ExecutionLog::new(Arc::clone(&store)),
            store,
            runner,
            gate: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn log(&self) -> &ExecutionLog {
        &self.log
    }

    /// Run the task forward until it finishes, fails, suspends on an async
    /// step, or hits a `run_next_after` delay.
    pub async fn advance(&self, task_id: &str, now: Timestamp) -> Result<Task> {
        let _gate = self.gate.lock().await;
        self.advance_locked(task_id, now, false).await
    }

    /// Deliver the result for an async step.
    ///
    /// Delivering the same token twice has the same effect as delivering it
    /// once: the token is cleared when the first result is applied.
    pub async fn on_complete(
        &self,
        token: &str,
        result: SyncResult,
        now: Timestamp,
    ) -> Result<CompletionOutcome> {
        let _gate = self.gate.lock().await;

        let Some(step) = self.store.find_step_by_token(token)? else {
            debug!(token = %token, "No step holds this token; ignoring completion");
            return Ok(CompletionOutcome::Ignored);
        };
        if step.status != StepStatus::Running {
            return Ok(CompletionOutcome::Ignored);
        }

        let mut task = self.store.get_task(&step.task_id)?;
        let open_execution = self.log.open_for_step(&step.id)?.map(|e| e.id);

        if task.status == TaskStatus::Cancelled {
            if let Some(s) = task.steps.iter_mut().find(|s| s.id == step.id) {
                s.reset();
            }
            task.updated_at = now;
            self.store.save_task(&task)?;
            if let Some(execution_id) = open_execution {
                self.log.finish(
                    &execution_id,
                    ExecutionStatus::Failed,
                    Some(DISCARDED_RESULT),
                    now,
                )?;
            }
            info!(task_id = %task.id, token = %token, "Discarded completion for cancelled task");
            return Ok(CompletionOutcome::Discarded);
        }

        if task.status != TaskStatus::Running || task.step_to_execute != step.position {
            warn!(
                task_id = %task.id,
                token = %token,
                position = step.position,
                "Completion does not match the task's current step; dropping token"
            );
            if let Some(s) = task.steps.iter_mut().find(|s| s.id == step.id) {
                s.pending_token = None;
                s.pending_since = None;
            }
            self.store.save_task(&task)?;
            return Ok(CompletionOutcome::Ignored);
        }

        let execution_id = match open_execution {
            Some(id) => id,
            None => self.log.start(&task.id, Some(&step.id), now)?,
        };
        match self.record_result(&mut task, &execution_id, result, now)? {
            Verdict::Continue => {
                let task = self.advance_locked(&task.id, now, false).await?;
                Ok(CompletionOutcome::Applied(task))
            }
            Verdict::Stop => Ok(CompletionOutcome::Applied(task)),
        }
    }

    /// Re-arm a finished or never-run task for a fresh run.
    pub async fn begin_run(&self, task_id: &str, now: Timestamp) -> Result<Task> {
        let _gate = self.gate.lock().await;
        let task = self.store.get_task(task_id)?;
        self.begin_run_locked(task, now)
    }

    /// Start a run for a schedule occurrence, unless the task is cancelled
    /// or a previous occurrence is still in flight.
    pub async fn dispatch(&self, task_id: &str, now: Timestamp) -> Result<DispatchOutcome> {
        let _gate = self.gate.lock().await;
        let task = self.store.get_task(task_id)?;
        match task.status {
            TaskStatus::Cancelled => Ok(DispatchOutcome::SkippedCancelled),
            TaskStatus::Running => Ok(DispatchOutcome::SkippedRunning),
            TaskStatus::Pending | TaskStatus::Completed | TaskStatus::Failed => {
                let task = self.begin_run_locked(task, now)?;
                let task = self.advance_locked(&task.id, now, false).await?;
                Ok(DispatchOutcome::Started(task))
            }
        }
    }

    /// Force the task forward now, ignoring any step delay.
    pub async fn run_now(&self, task_id: &str, now: Timestamp) -> Result<RunNowOutcome> {
        let _gate = self.gate.lock().await;
        let task = self.store.get_task(task_id)?;
        match task.status {
            TaskStatus::Cancelled => Err(EngineError::validation(format!(
                "task {task_id} is cancelled and cannot be run"
            ))),
            TaskStatus::Running if task.is_awaiting_completion() => {
                Ok(RunNowOutcome::AwaitingCompletion(task))
            }
            TaskStatus::Running => {
                let task = self.advance_locked(task_id, now, true).await?;
                Ok(RunNowOutcome::Resumed(task))
            }
            TaskStatus::Pending | TaskStatus::Completed | TaskStatus::Failed => {
                let task = self.begin_run_locked(task, now)?;
                let task = self.advance_locked(&task.id, now, false).await?;
                Ok(RunNowOutcome::Started(task))
            }
        }
    }

    /// Cancel a non-terminal task.
    ///
    /// An outstanding async step keeps its token so the eventual completion
    /// (or timeout) can close its execution.
    pub async fn cancel(&self, task_id: &str, now: Timestamp) -> Result<Task> {
        let _gate = self.gate.lock().await;
        let mut task = self.store.get_task(task_id)?;
        if task.status.is_terminal() {
            return Err(EngineError::validation(format!(
                "task {task_id} is already {}",
                task.status
            )));
        }
        task.status = TaskStatus::Cancelled;
        task.next_step_at = None;
        task.updated_at = now;
        self.store.save_task(&task)?;
        info!(task_id = %task_id, step = task.step_to_execute, "Task cancelled");
        Ok(task)
    }

    /// Delete a task between transitions so no step is mid-flight.
    pub async fn delete(&self, task_id: &str) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.store.delete_task(task_id)?;
        info!(task_id = %task_id, "Task deleted");
        Ok(())
    }

    // ── Internals (caller holds the gate) ───────────────────────────

    fn begin_run_locked(&self, mut task: Task, now: Timestamp) -> Result<Task> {
        match task.status {
            TaskStatus::Cancelled => {
                return Err(EngineError::validation(format!(
                    "task {} is cancelled",
                    task.id
                )));
            }
            TaskStatus::Running => {
                return Err(EngineError::validation(format!(
                    "task {} is already running",
                    task.id
                )));
            }
            _ => {}
        }
        task.reset_for_run();
        task.updated_at = now;
        self.store.save_task(&task)?;
        debug!(task_id = %task.id, run = task.executions_count, "Task armed for a new run");
        Ok(task)
    }

    async fn advance_locked(
        &self,
        task_id: &str,
        now: Timestamp,
        mut ignore_delay: bool,
    ) -> Result<Task> {
        let mut task = self.store.get_task(task_id)?;

        loop {
            if task.status.is_terminal() {
                return Ok(task);
            }

            if task.all_steps_done() {
                task.status = TaskStatus::Completed;
                task.next_step_at = None;
                task.updated_at = now;
                self.store.save_task(&task)?;
                info!(task_id = %task.id, steps = task.total_steps(), "Task completed");
                return Ok(task);
            }

            if let Some(at) = task.next_step_at {
                if at > now && !ignore_delay {
                    debug!(task_id = %task.id, next_step_at = %at, "Next step deferred");
                    return Ok(task);
                }
                task.next_step_at = None;
            }
            ignore_delay = false;

            let index = task.step_to_execute;
            let (step_id, call_id, mode, step_status): (Id, Id, _, _) = {
                let step = &task.steps[index];
                if step.is_awaiting_completion() {
                    return Ok(task);
                }
                (step.id.clone(), step.call_id.clone(), step.mode, step.status)
            };
            let call = self.store.get_call(&call_id)?;
            let codex = self.store.get_codex(&call.codex_id)?;

            let execution_id = match step_status {
                StepStatus::Pending => {
                    task.steps[index].status = StepStatus::Running;
                    task.status = TaskStatus::Running;
                    task.updated_at = now;
                    self.store.save_task(&task)?;
                    self.log.start(&task.id, Some(&step_id), now)?
                }
                StepStatus::Running => {
                    warn!(
                        task_id = %task.id,
                        position = index,
                        "Step was interrupted before its result was recorded; running it again"
                    );
                    match self.log.open_for_step(&step_id)? {
                        Some(execution) => execution.id,
                        None => self.log.start(&task.id, Some(&step_id), now)?,
                    }
                }
                StepStatus::Completed => {
                    task.step_to_execute += 1;
                    task.updated_at = now;
                    self.store.save_task(&task)?;
                    continue;
                }
                StepStatus::Failed => {
                    task.status = TaskStatus::Failed;
                    task.updated_at = now;
                    self.store.save_task(&task)?;
                    return Ok(task);
                }
            };

            self.log.append_log(
                &execution_id,
                &format!("step {index}: invoking codex {} ({mode})\n", codex.name),
                now,
            )?;

            let verdict = match self.runner.invoke(&codex, mode).await {
                Ok(Invocation::Completed(result)) => {
                    self.record_result(&mut task, &execution_id, result, now)?
                }
                Ok(Invocation::Pending(token)) => {
                    let token = token.into_inner();
                    self.log.append_log(
                        &execution_id,
                        &format!("step {index}: awaiting completion {token}\n"),
                        now,
                    )?;
                    let step = &mut task.steps[index];
                    step.pending_token = Some(token);
                    step.pending_since = Some(now);
                    task.updated_at = now;
                    self.store.save_task(&task)?;
                    debug!(task_id = %task.id, position = index, "Step suspended on async call");
                    Verdict::Stop
                }
                Err(err) => {
                    warn!(task_id = %task.id, position = index, error = %err, "Runner failed");
                    let failure = SyncResult::failure(err.to_string());
                    self.record_result(&mut task, &execution_id, failure, now)?
                }
            };

            if verdict == Verdict::Stop {
                return Ok(task);
            }
        }
    }

    /// Apply a step result to the current step and persist it.
    fn record_result(
        &self,
        task: &mut Task,
        execution_id: &str,
        result: SyncResult,
        now: Timestamp,
    ) -> Result<Verdict> {
        let index = task.step_to_execute;
        let text = result.result_text();

        if result.success {
            self.log
                .finish(execution_id, ExecutionStatus::Completed, Some(&text), now)?;
            if let Some(step) = task.current_step_mut() {
                step.status = StepStatus::Completed;
                step.pending_token = None;
                step.pending_since = None;
            }
            task.step_to_execute += 1;
            let delay = task.current_step().map_or(0, |next| next.run_next_after);
            if delay > 0 {
                // Out-of-range delays park the task at the end of time.
                task.next_step_at = Some(add_secs(now, delay).unwrap_or(DateTime::<Utc>::MAX_UTC));
            }
            task.updated_at = now;
            self.store.save_task(task)?;
            debug!(task_id = %task.id, position = index, "Step completed");
            Ok(Verdict::Continue)
        } else {
            self.log
                .finish(execution_id, ExecutionStatus::Failed, Some(&text), now)?;
            if let Some(step) = task.current_step_mut() {
                step.status = StepStatus::Failed;
                step.pending_token = None;
                step.pending_since = None;
            }
            task.status = TaskStatus::Failed;
            task.next_step_at = None;
            task.updated_at = now;
            self.store.save_task(task)?;
            warn!(task_id = %task.id, position = index, error = %text, "Step failed");
            Ok(Verdict::Stop)
        }
    }
}
