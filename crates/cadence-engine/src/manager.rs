//! Public facade over the store, executor and dispatcher.

use std::sync::Arc;

use cadence_runner::{CodeRunner, CompletionReceiver, SyncResult};
use cadence_store::{NewSchedule, NewStep, TaskStore};
use cadence_types::{
    CallMode, Codex, ExecutionStatus, Id, MAX_DELAY_SECS, Task, TaskSchedule, TaskStatus,
    Timestamp, add_secs, now,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::dispatcher::{DispatcherConfig, DispatcherHandle, TickReport, TimerDispatcher};
use crate::error::{EngineError, Result};
use crate::executor::{CompletionOutcome, RunNowOutcome, StepExecutor};
use crate::pagination::{Page, PageRequest};

/// Interval label for tasks that only run on demand.
const MANUAL_INTERVAL: &str = "manual";

/// One step of a task definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Codex id or name.
    pub codex_ref: String,
    #[serde(default)]
    pub is_async: bool,
    /// Seconds to wait after the previous step before running this one.
    #[serde(default)]
    pub run_next_after: i64,
}

impl StepConfig {
    pub fn sync(codex_ref: impl Into<String>) -> Self {
        Self {
            codex_ref: codex_ref.into(),
            is_async: false,
            run_next_after: 0,
        }
    }

    pub fn asynchronous(codex_ref: impl Into<String>) -> Self {
        Self {
            codex_ref: codex_ref.into(),
            is_async: true,
            run_next_after: 0,
        }
    }

    pub fn after(mut self, seconds: i64) -> Self {
        self.run_next_after = seconds;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task_id: Id,
    pub schedule_id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusReport {
    pub status: TaskStatus,
    pub step_to_execute: usize,
    pub total_steps: usize,
}

/// One row of `get_task_logs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEntry {
    pub execution_id: Id,
    pub status: ExecutionStatus,
    pub logs: String,
    pub result: Option<String>,
    pub created_at: Timestamp,
}

/// One row of `list_tasks` / `list_scheduled_tasks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: Id,
    pub name: String,
    /// `None` when a schedule points at a deleted task.
    pub status: Option<TaskStatus>,
    pub schedule_id: Option<Id>,
    pub last_run: Option<Timestamp>,
    pub next_run: Option<Timestamp>,
    pub interval: String,
    pub disabled: bool,
}

#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    pub dispatcher: DispatcherConfig,
    /// Start the dispatcher from [`TaskManager::init`].
    pub autostart: bool,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            autostart: true,
        }
    }
}

/// Entry point for everything outside the engine.
///
/// Owns the dispatcher lifecycle: [`init`](Self::init) starts it and
/// [`shutdown`](Self::shutdown) stops it.
pub struct TaskManager {
    store: Arc<TaskStore>,
    executor: Arc<StepExecutor>,
    dispatcher: Arc<TimerDispatcher>,
    autostart: bool,
    completions: parking_lot::Mutex<Option<CompletionReceiver>>,
    handle: tokio::sync::Mutex<Option<DispatcherHandle>>,
}

impl TaskManager {
    pub fn new(store: Arc<TaskStore>, runner: Arc<dyn CodeRunner>, config: TaskManagerConfig) -> Self {
        let executor = Arc::new(StepExecutor::new(Arc::clone(&store), runner));
        let dispatcher = Arc::new(TimerDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&executor),
            config.dispatcher,
        ));
        Self {
            store,
            executor,
            dispatcher,
            autostart: config.autostart,
            completions: parking_lot::Mutex::new(None),
            handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Route async completions from this receiver into the executor once the
    /// dispatcher runs.
    pub fn with_completions(self, completions: CompletionReceiver) -> Self {
        *self.completions.lock() = Some(completions);
        self
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn executor(&self) -> &Arc<StepExecutor> {
        &self.executor
    }

    pub fn dispatcher(&self) -> &Arc<TimerDispatcher> {
        &self.dispatcher
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Start the dispatcher if autostart is on.
    pub async fn init(&self) {
        if self.autostart {
            self.start_dispatcher().await;
        }
    }

    /// Start the dispatcher loop. Returns `false` if it was already running.
    pub async fn start_dispatcher(&self) -> bool {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().is_some_and(DispatcherHandle::is_running) {
            return false;
        }
        let completions = self.completions.lock().take();
        *handle = Some(Arc::clone(&self.dispatcher).start(completions));
        true
    }

    pub async fn is_dispatcher_running(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(DispatcherHandle::is_running)
    }

    /// Stop the dispatcher and wait for its loop to exit.
    ///
    /// The completion receiver is kept, so a later
    /// [`start_dispatcher`](Self::start_dispatcher) resumes delivery.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            if let Some(completions) = handle.stop().await {
                let mut slot = self.completions.lock();
                if slot.is_none() {
                    *slot = Some(completions);
                }
            }
            info!("Task manager shut down");
        }
    }

    /// Resume running tasks that were left between steps, e.g. by a process
    /// that exited mid-run. The dispatcher loop does this on start.
    pub async fn recover_stalled(&self) -> usize {
        self.dispatcher.recover(now()).await
    }

    /// Run one dispatcher pass at `now` without the background loop.
    pub async fn tick(&self, now: Timestamp) -> TickReport {
        self.dispatcher.tick(now).await
    }

    // ── Codices ─────────────────────────────────────────────────────

    pub fn register_codex(
        &self,
        name: &str,
        payload: &str,
        description: Option<&str>,
    ) -> Result<Codex> {
        let codex = self.store.create_codex(name, payload, description, now())?;
        info!(codex_id = %codex.id, name = %codex.name, "Registered codex");
        Ok(codex)
    }

    pub fn list_codices(&self) -> Result<Vec<Codex>> {
        Ok(self.store.list_codices()?)
    }

    // ── Tasks ───────────────────────────────────────────────────────

    /// Create a task. It starts `pending` and runs when scheduled or forced.
    pub fn create_task(&self, name: &str, metadata: &str, steps: &[StepConfig]) -> Result<Id> {
        validate_name(name)?;
        let new_steps = self.resolve_steps(steps)?;
        let task = self.store.create_task(name, metadata, &new_steps, now())?;
        info!(task_id = %task.id, name = %name, steps = task.total_steps(), "Created task");
        Ok(task.id)
    }

    /// Create a task bound to a schedule. `repeat_every == 0` is a one-shot;
    /// `run_after` delays the first occurrence.
    pub fn create_scheduled_task(
        &self,
        name: &str,
        steps: &[StepConfig],
        repeat_every: i64,
        run_after: i64,
    ) -> Result<ScheduledTask> {
        self.create_scheduled_task_with_metadata(name, "", steps, repeat_every, run_after)
    }

    /// [`create_scheduled_task`](Self::create_scheduled_task) with task
    /// metadata.
    pub fn create_scheduled_task_with_metadata(
        &self,
        name: &str,
        metadata: &str,
        steps: &[StepConfig],
        repeat_every: i64,
        run_after: i64,
    ) -> Result<ScheduledTask> {
        validate_name(name)?;
        let repeat_every = bounded_secs("repeat_every", repeat_every)?;
        let run_after = bounded_secs("run_after", run_after)?;
        let new_steps = self.resolve_steps(steps)?;

        let created = now();
        let run_at = match run_after {
            0 => None,
            secs => Some(add_secs(created, secs).ok_or_else(|| {
                EngineError::validation(format!("run_after {secs}s is out of range"))
            })?),
        };
        let task = self.store.create_task(name, metadata, &new_steps, created)?;
        let schedule = match self.store.create_schedule(
            &NewSchedule {
                name: name.to_string(),
                task_id: task.id.clone(),
                run_at,
                repeat_every,
            },
            created,
        ) {
            Ok(schedule) => schedule,
            Err(e) => {
                if let Err(cleanup) = self.store.delete_task(&task.id) {
                    error!(task_id = %task.id, error = %cleanup, "Failed to remove task after schedule error");
                }
                return Err(e.into());
            }
        };

        info!(
            task_id = %task.id,
            schedule_id = %schedule.id,
            interval = %schedule.interval_label(),
            "Created scheduled task"
        );
        Ok(ScheduledTask {
            task_id: task.id,
            schedule_id: schedule.id,
        })
    }

    /// Same as [`create_scheduled_task`](Self::create_scheduled_task) with
    /// an explicit ordered step list.
    pub fn create_multi_step_scheduled_task(
        &self,
        name: &str,
        steps_config: &[StepConfig],
        repeat_every: i64,
        run_after: i64,
    ) -> Result<ScheduledTask> {
        self.create_scheduled_task(name, steps_config, repeat_every, run_after)
    }

    /// Tasks, newest first, 0-based pages.
    pub fn list_tasks(&self, page_num: usize, page_size: usize) -> Result<Page<TaskSummary>> {
        let request = PageRequest::new(page_num, page_size)?;
        let total = self.store.count_tasks()?;
        let tasks = self.store.list_tasks(request.offset(), request.limit())?;

        let mut items = Vec::with_capacity(tasks.len());
        for task in tasks {
            let schedules = self.store.schedules_for_task(&task.id)?;
            let summary = match schedules.first() {
                Some(schedule) => summarize(Some(&task), schedule),
                None => {
                    let last_run = self
                        .store
                        .list_executions(&task.id, 1)?
                        .first()
                        .map(|e| e.created_at);
                    TaskSummary {
                        task_id: task.id,
                        name: task.name,
                        status: Some(task.status),
                        schedule_id: None,
                        last_run,
                        next_run: None,
                        interval: MANUAL_INTERVAL.to_string(),
                        disabled: false,
                    }
                }
            };
            items.push(summary);
        }
        Ok(Page::new(items, total, request))
    }

    /// One row per schedule, newest first, 0-based pages.
    pub fn list_scheduled_tasks(
        &self,
        page_num: usize,
        page_size: usize,
    ) -> Result<Page<TaskSummary>> {
        let request = PageRequest::new(page_num, page_size)?;
        let total = self.store.count_schedules()?;
        let schedules = self.store.list_schedules(request.offset(), request.limit())?;

        let mut items = Vec::with_capacity(schedules.len());
        for schedule in &schedules {
            let task = match self.store.get_task(&schedule.task_id) {
                Ok(task) => Some(task),
                Err(cadence_store::StoreError::NotFound { .. }) => None,
                Err(e) => return Err(e.into()),
            };
            items.push(summarize(task.as_ref(), schedule));
        }
        Ok(Page::new(items, total, request))
    }

    pub fn get_task_status(&self, task_id: &str) -> Result<TaskStatusReport> {
        let task = self.store.get_task(task_id)?;
        Ok(TaskStatusReport {
            status: task.status,
            step_to_execute: task.step_to_execute,
            total_steps: task.total_steps(),
        })
    }

    /// Execution history, newest first.
    pub fn get_task_logs(&self, task_id: &str, limit: usize) -> Result<Vec<ExecutionEntry>> {
        if limit == 0 {
            return Err(EngineError::validation("limit must be at least 1"));
        }
        // Surface NotFound for unknown ids rather than an empty list.
        self.store.get_task(task_id)?;
        let entries = self
            .executor
            .log()
            .list(task_id, limit)?
            .into_iter()
            .map(|e| ExecutionEntry {
                execution_id: e.id,
                status: e.status,
                logs: e.logs,
                result: e.result,
                created_at: e.created_at,
            })
            .collect();
        Ok(entries)
    }

    /// Cancel a task. Any in-flight async result is discarded on arrival.
    pub async fn stop_task(&self, task_id: &str) -> Result<()> {
        self.executor.cancel(task_id, now()).await?;
        Ok(())
    }

    /// Advance a task immediately regardless of its schedules, which are
    /// left untouched.
    pub async fn run_task_now(&self, task_id: &str) -> Result<RunNowOutcome> {
        let outcome = self.executor.run_now(task_id, now()).await?;
        info!(task_id = %task_id, "{}", outcome.message());
        Ok(outcome)
    }

    /// Delete a task with its steps and executions. Schedules are kept and
    /// skipped by the dispatcher until deleted.
    pub async fn delete_task(&self, task_id: &str) -> Result<()> {
        let dangling = self.store.schedules_for_task(task_id)?.len();
        self.executor.delete(task_id).await?;
        if dangling > 0 {
            warn!(task_id = %task_id, schedules = dangling, "Deleted task still has schedules");
        }
        Ok(())
    }

    // ── Schedules ───────────────────────────────────────────────────

    pub fn toggle_schedule(&self, schedule_id: &str, disabled: bool) -> Result<()> {
        self.store.set_schedule_disabled(schedule_id, disabled, now())?;
        info!(schedule_id = %schedule_id, disabled, "Schedule toggled");
        Ok(())
    }

    pub fn delete_schedule(&self, schedule_id: &str) -> Result<()> {
        self.store.delete_schedule(schedule_id)?;
        Ok(())
    }

    pub fn get_schedule(&self, schedule_id: &str) -> Result<TaskSchedule> {
        Ok(self.store.get_schedule(schedule_id)?)
    }

    // ── Completions ─────────────────────────────────────────────────

    /// External entry point for async results.
    pub async fn on_complete(&self, token: &str, result: SyncResult) -> Result<CompletionOutcome> {
        self.executor.on_complete(token, result, now()).await
    }

    pub fn get_task(&self, task_id: &str) -> Result<Task> {
        Ok(self.store.get_task(task_id)?)
    }

    fn resolve_steps(&self, steps: &[StepConfig]) -> Result<Vec<NewStep>> {
        if steps.is_empty() {
            return Err(EngineError::validation("a task needs at least one step"));
        }
        steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let run_next_after = check_secs("run_next_after", step.run_next_after)
                    .map_err(|reason| EngineError::validation(format!("step {i}: {reason}")))?;
                let codex = self.store.find_codex(&step.codex_ref)?;
                Ok(NewStep {
                    codex_id: codex.id,
                    mode: CallMode::from_is_async(step.is_async),
                    run_next_after,
                })
            })
            .collect()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(EngineError::validation("task name must not be empty"));
    }
    Ok(())
}

/// Seconds in `0..=MAX_DELAY_SECS`, or the reason the value is rejected.
fn check_secs(field: &str, value: i64) -> std::result::Result<u64, String> {
    let secs =
        u64::try_from(value).map_err(|_| format!("{field} must not be negative, got {value}"))?;
    if secs > MAX_DELAY_SECS {
        return Err(format!(
            "{field} must be at most {MAX_DELAY_SECS} seconds, got {secs}"
        ));
    }
    Ok(secs)
}

fn bounded_secs(field: &str, value: i64) -> Result<u64> {
    check_secs(field, value).map_err(EngineError::Validation)
}

fn summarize(task: Option<&Task>, schedule: &TaskSchedule) -> TaskSummary {
    TaskSummary {
        task_id: schedule.task_id.clone(),
        name: task.map_or_else(|| schedule.name.clone(), |t| t.name.clone()),
        status: task.map(|t| t.status),
        schedule_id: Some(schedule.id.clone()),
        last_run: schedule.last_run_at,
        next_run: if schedule.disabled {
            None
        } else {
            schedule.next_run_at
        },
        interval: schedule.interval_label(),
        disabled: schedule.disabled,
    }
}
