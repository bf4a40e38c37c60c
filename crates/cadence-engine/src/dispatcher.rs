//! Periodic driver that fires due schedules, resumes deferred steps and
//! times out async steps whose completion never arrived.

use std::sync::Arc;
use std::time::Duration;

use cadence_runner::{Completion, CompletionReceiver, SyncResult};
use cadence_store::TaskStore;
use cadence_types::{TaskSchedule, Timestamp, now};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::executor::{CompletionOutcome, DispatchOutcome, StepExecutor};

/// Default seconds between ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Default maximum wait for an async completion.
pub const DEFAULT_ASYNC_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub tick_interval: Duration,
    pub async_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            async_timeout: DEFAULT_ASYNC_TIMEOUT,
        }
    }
}

/// Counters for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Schedules that started a run.
    pub dispatched: usize,
    /// Deferred tasks advanced.
    pub resumed: usize,
    /// Async steps failed for exceeding the wait window.
    pub timed_out: usize,
    /// Due schedules whose task was missing, cancelled or still running.
    pub skipped: usize,
    /// Items that failed with an engine error.
    pub errors: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// Drives the step executor from wall-clock time.
///
/// Holds no global state: any number of dispatchers can exist side by side,
/// each with its own [`DispatcherHandle`].
pub struct TimerDispatcher {
    store: Arc<TaskStore>,
    executor: Arc<StepExecutor>,
    config: DispatcherConfig,
}

impl TimerDispatcher {
    pub fn new(store: Arc<TaskStore>, executor: Arc<StepExecutor>, config: DispatcherConfig) -> Self {
        Self {
            store,
            executor,
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Run one pass at `now`.
    ///
    /// A failure on one item is logged and counted; the pass always visits
    /// every due item.
    pub async fn tick(&self, now: Timestamp) -> TickReport {
        let mut report = TickReport::default();

        match self.store.list_due_schedules(now) {
            Ok(due) => {
                for schedule in due {
                    self.fire_schedule(&schedule, now, &mut report).await;
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to load due schedules");
                report.errors += 1;
            }
        }

        match self.store.list_due_deferred_tasks(now) {
            Ok(tasks) => {
                for task in tasks {
                    match self.executor.advance(&task.id, now).await {
                        Ok(_) => report.resumed += 1,
                        Err(e) => {
                            error!(task_id = %task.id, error = %e, "Failed to resume deferred task");
                            report.errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to load deferred tasks");
                report.errors += 1;
            }
        }

        match self
            .store
            .list_due_async_tasks(now, self.config.async_timeout)
        {
            Ok(tasks) => {
                let failure = SyncResult::failure(format!(
                    "TimeoutError: no completion within {}s",
                    self.config.async_timeout.as_secs()
                ));
                for task in tasks {
                    let Some(token) = task.current_step().and_then(|s| s.pending_token.clone())
                    else {
                        continue;
                    };
                    warn!(task_id = %task.id, token = %token, "Async step timed out");
                    match self.executor.on_complete(&token, failure.clone(), now).await {
                        Ok(_) => report.timed_out += 1,
                        Err(e) => {
                            error!(task_id = %task.id, error = %e, "Failed to time out async step");
                            report.errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to load overdue async tasks");
                report.errors += 1;
            }
        }

        if !report.is_idle() {
            debug!(
                dispatched = report.dispatched,
                resumed = report.resumed,
                timed_out = report.timed_out,
                skipped = report.skipped,
                errors = report.errors,
                "Tick finished"
            );
        }
        report
    }

    /// Re-advance running tasks left without a way forward: no pending async
    /// token and no deferred resume time. A process that stops between
    /// persisting a completed step and starting the next one leaves tasks in
    /// this state. Returns how many tasks were advanced.
    pub async fn recover(&self, now: Timestamp) -> usize {
        let stalled = match self.store.list_stalled_tasks() {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "Failed to load stalled tasks");
                return 0;
            }
        };

        let mut recovered = 0;
        for task in stalled {
            warn!(task_id = %task.id, step = task.step_to_execute, "Resuming stalled task");
            match self.executor.advance(&task.id, now).await {
                Ok(_) => recovered += 1,
                Err(e) => error!(task_id = %task.id, error = %e, "Failed to resume stalled task"),
            }
        }
        recovered
    }

    async fn fire_schedule(&self, schedule: &TaskSchedule, now: Timestamp, report: &mut TickReport) {
        // Record the occurrence before the first step runs.
        if let Err(e) = self.store.mark_schedule_dispatched(&schedule.id, now) {
            error!(schedule_id = %schedule.id, error = %e, "Failed to mark schedule dispatched");
            report.errors += 1;
            return;
        }

        match self.executor.dispatch(&schedule.task_id, now).await {
            Ok(DispatchOutcome::Started(task)) => {
                info!(
                    schedule_id = %schedule.id,
                    task_id = %task.id,
                    status = %task.status,
                    "Schedule dispatched"
                );
                report.dispatched += 1;
            }
            Ok(DispatchOutcome::SkippedRunning) => {
                debug!(schedule_id = %schedule.id, task_id = %schedule.task_id, "Previous run still in flight; skipping occurrence");
                report.skipped += 1;
            }
            Ok(DispatchOutcome::SkippedCancelled) => {
                debug!(schedule_id = %schedule.id, task_id = %schedule.task_id, "Task cancelled; skipping occurrence");
                report.skipped += 1;
            }
            Err(EngineError::NotFound { .. }) => {
                warn!(schedule_id = %schedule.id, task_id = %schedule.task_id, "Schedule points at a missing task");
                report.skipped += 1;
            }
            Err(e) => {
                error!(schedule_id = %schedule.id, error = %e, "Schedule dispatch failed");
                report.errors += 1;
            }
        }
    }

    async fn deliver(&self, completion: Completion) {
        let token = completion.token.to_string();
        match self
            .executor
            .on_complete(&token, completion.result, now())
            .await
        {
            Ok(CompletionOutcome::Applied(task)) => {
                debug!(task_id = %task.id, token = %token, status = %task.status, "Completion applied");
            }
            Ok(CompletionOutcome::Discarded) | Ok(CompletionOutcome::Ignored) => {}
            Err(e) => error!(token = %token, error = %e, "Failed to apply completion"),
        }
    }

    /// Spawn the tick loop on the current tokio runtime.
    ///
    /// Stalled tasks are recovered before the first tick. When `completions`
    /// is given, async results arriving on it are applied between ticks, and
    /// [`DispatcherHandle::stop`] hands the receiver back.
    pub fn start(self: Arc<Self>, completions: Option<CompletionReceiver>) -> DispatcherHandle {
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let tick_interval = self.config.tick_interval;

        let join = tokio::spawn(async move {
            let mut completions = completions;
            let mut completions_open = completions.is_some();
            let mut interval = tokio::time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(tick_secs = tick_interval.as_secs(), "Timer dispatcher started");
            let recovered = self.recover(now()).await;
            if recovered > 0 {
                info!(recovered, "Recovered stalled tasks");
            }
            loop {
                tokio::select! {
                    biased;
                    _ = loop_cancel.cancelled() => break,
                    completion = recv_completion(&mut completions), if completions_open => {
                        match completion {
                            Some(completion) => self.deliver(completion).await,
                            None => {
                                debug!("Completion channel closed");
                                completions_open = false;
                            }
                        }
                    }
                    _ = interval.tick() => {
                        self.tick(now()).await;
                    }
                }
            }
            info!("Timer dispatcher stopped");
            completions
        });

        DispatcherHandle { cancel, join }
    }
}

async fn recv_completion(rx: &mut Option<CompletionReceiver>) -> Option<Completion> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Owner of a running dispatcher loop.
pub struct DispatcherHandle {
    cancel: CancellationToken,
    join: JoinHandle<Option<CompletionReceiver>>,
}

impl DispatcherHandle {
    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Signal the loop to stop and wait for it to exit.
    ///
    /// Returns the completion receiver the loop was started with, so a later
    /// [`TimerDispatcher::start`] can keep listening on the same channel.
    pub async fn stop(self) -> Option<CompletionReceiver> {
        self.cancel.cancel();
        match self.join.await {
            Ok(completions) => completions,
            Err(e) => {
                error!(error = %e, "Timer dispatcher task panicked");
                None
            }
        }
    }
}
