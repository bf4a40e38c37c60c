//! End-to-end behavior of the executor and dispatcher against a real store
//! and the scripted runner.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use cadence_engine::{
    CompletionOutcome, DISCARDED_RESULT, DispatcherConfig, StepConfig, StepExecutor,
    TaskManager, TaskManagerConfig, TimerDispatcher,
};
use cadence_runner::{MockRunner, SyncResult, completion_channel};
use cadence_store::{NewSchedule, NewStep, TaskStore};
use cadence_types::{CallMode, ExecutionStatus, StepStatus, Task, TaskStatus, Timestamp};
use chrono::{Duration, TimeZone, Utc};

fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap()
}

struct Harness {
    store: Arc<TaskStore>,
    runner: Arc<MockRunner>,
    executor: Arc<StepExecutor>,
    dispatcher: TimerDispatcher,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(Arc::new(TaskStore::open_in_memory().unwrap()))
    }

    fn with_store(store: Arc<TaskStore>) -> Self {
        let runner = Arc::new(MockRunner::new());
        let executor = Arc::new(StepExecutor::new(Arc::clone(&store), runner.clone()));
        let dispatcher = TimerDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&executor),
            DispatcherConfig {
                tick_interval: StdDuration::from_secs(5),
                async_timeout: StdDuration::from_secs(60),
            },
        );
        Self {
            store,
            runner,
            executor,
            dispatcher,
        }
    }

    /// Create a task; codices are created on first use with a trivial payload.
    fn task(&self, steps: &[(&str, CallMode, u64)]) -> Task {
        let new_steps: Vec<NewStep> = steps
            .iter()
            .map(|(name, mode, delay)| {
                let codex = self
                    .store
                    .find_codex(name)
                    .or_else(|_| self.store.create_codex(name, "true", None, t0()))
                    .unwrap();
                NewStep {
                    codex_id: codex.id,
                    mode: *mode,
                    run_next_after: *delay,
                }
            })
            .collect();
        self.store.create_task("job", "", &new_steps, t0()).unwrap()
    }

    fn schedule(&self, task: &Task, run_at: Option<Timestamp>, repeat_every: u64, created: Timestamp) -> String {
        self.store
            .create_schedule(
                &NewSchedule {
                    name: "sched".to_string(),
                    task_id: task.id.clone(),
                    run_at,
                    repeat_every,
                },
                created,
            )
            .unwrap()
            .id
    }

    fn reload(&self, task: &Task) -> Task {
        self.store.get_task(&task.id).unwrap()
    }

    fn token(&self, task: &Task) -> String {
        self.reload(task).steps[task.step_to_execute]
            .pending_token
            .clone()
            .expect("step should hold a token")
    }
}

#[tokio::test]
async fn test_two_sync_steps_complete_in_one_pass() {
    let h = Harness::new();
    let task = h.task(&[("a", CallMode::Sync, 0), ("b", CallMode::Sync, 0)]);

    let task = h.executor.advance(&task.id, t0()).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.step_to_execute, 2);
    let entries = h.store.list_executions(&task.id, 10).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.status == ExecutionStatus::Completed));
}

#[tokio::test]
async fn test_past_one_shot_dispatches_exactly_once() {
    let h = Harness::new();
    let task = h.task(&[("a", CallMode::Sync, 0)]);
    let id = h.schedule(&task, Some(t0() - Duration::seconds(10)), 0, t0() - Duration::seconds(20));

    let first = h.dispatcher.tick(t0()).await;
    assert_eq!(first.dispatched, 1);

    for offset in [1, 60, 86_400] {
        let again = h.dispatcher.tick(t0() + Duration::seconds(offset)).await;
        assert_eq!(again.dispatched, 0);
    }

    let schedule = h.store.get_schedule(&id).unwrap();
    assert_eq!(schedule.last_run_at, Some(t0()));
    assert!(schedule.next_run_at.is_none());
    assert_eq!(h.runner.invocation_count(), 1);
    assert_eq!(h.reload(&task).executions_count, 1);
}

#[tokio::test]
async fn test_recurring_then_disabled() {
    let h = Harness::new();
    let task = h.task(&[("a", CallMode::Sync, 0)]);
    let id = h.schedule(&task, None, 3600, t0());
    let t1 = t0() + Duration::seconds(3600);

    assert_eq!(h.dispatcher.tick(t1).await.dispatched, 1);
    let schedule = h.store.get_schedule(&id).unwrap();
    assert_eq!(schedule.last_run_at, Some(t1));

    h.store.set_schedule_disabled(&id, true, t1).unwrap();
    let report = h.dispatcher.tick(t0() + Duration::seconds(7200)).await;
    assert_eq!(report.dispatched, 0);
    assert_eq!(h.runner.invocation_count(), 1);
}

#[tokio::test]
async fn test_disabled_schedule_is_never_dispatched() {
    let h = Harness::new();
    let task = h.task(&[("a", CallMode::Sync, 0)]);
    let id = h.schedule(&task, None, 10, t0());
    h.store.set_schedule_disabled(&id, true, t0()).unwrap();

    for offset in [0, 10, 1_000, 1_000_000] {
        let report = h.dispatcher.tick(t0() + Duration::seconds(offset)).await;
        assert_eq!(report.dispatched, 0);
    }
    assert_eq!(h.runner.invocation_count(), 0);
    assert_eq!(h.reload(&task).status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_recurring_waits_full_interval() {
    let h = Harness::new();
    let task = h.task(&[("a", CallMode::Sync, 0)]);
    h.schedule(&task, None, 300, t0());

    assert_eq!(h.dispatcher.tick(t0()).await.dispatched, 1);
    assert_eq!(h.dispatcher.tick(t0() + Duration::seconds(299)).await.dispatched, 0);
    assert_eq!(h.dispatcher.tick(t0() + Duration::seconds(300)).await.dispatched, 1);
    assert_eq!(h.reload(&task).executions_count, 2);
}

#[tokio::test]
async fn test_missed_intervals_skip_to_now() {
    let h = Harness::new();
    let task = h.task(&[("a", CallMode::Sync, 0)]);
    let id = h.schedule(&task, None, 60, t0());

    // Ten intervals of downtime collapse into one dispatch.
    let late = t0() + Duration::seconds(600);
    assert_eq!(h.dispatcher.tick(late).await.dispatched, 1);
    assert_eq!(h.dispatcher.tick(late + Duration::seconds(1)).await.dispatched, 0);

    let schedule = h.store.get_schedule(&id).unwrap();
    assert_eq!(schedule.next_run_at, Some(late + Duration::seconds(60)));
}

#[tokio::test]
async fn test_failing_step_stops_task() {
    let h = Harness::new();
    h.runner.raise("b", "boom");
    let task = h.task(&[("a", CallMode::Sync, 0), ("b", CallMode::Sync, 0)]);

    let task = h.executor.advance(&task.id, t0()).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.steps[0].status, StepStatus::Completed);
    assert_eq!(task.steps[1].status, StepStatus::Failed);
    assert_eq!(task.step_to_execute, 1);

    let entries = h.store.list_executions(&task.id, 10).unwrap();
    assert_eq!(entries[0].status, ExecutionStatus::Failed);
    assert!(entries[0].result.as_deref().unwrap().contains("boom"));
}

#[tokio::test]
async fn test_async_step_waits_for_completion() {
    let h = Harness::new();
    let task = h.task(&[("a", CallMode::Async, 0)]);

    let task = h.executor.advance(&task.id, t0()).await.unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.step_to_execute, 0);
    assert!(task.is_awaiting_completion());

    let token = h.token(&task);
    let outcome = h
        .executor
        .on_complete(&token, SyncResult::success("done"), t0())
        .await
        .unwrap();
    let CompletionOutcome::Applied(task) = outcome else {
        panic!("expected the completion to apply, got {outcome:?}");
    };
    assert_eq!(task.step_to_execute, 1);
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_duplicate_completion_is_idempotent() {
    let h = Harness::new();
    let task = h.task(&[("a", CallMode::Async, 0), ("b", CallMode::Sync, 0)]);
    h.executor.advance(&task.id, t0()).await.unwrap();
    let token = h.token(&task);

    h.executor
        .on_complete(&token, SyncResult::success("ok"), t0())
        .await
        .unwrap();
    let after_first = h.reload(&task);
    let executions_first = h.store.list_executions(&task.id, 10).unwrap();

    let second = h
        .executor
        .on_complete(&token, SyncResult::failure("late duplicate"), t0())
        .await
        .unwrap();
    assert_eq!(second, CompletionOutcome::Ignored);
    assert_eq!(h.reload(&task), after_first);
    assert_eq!(h.store.list_executions(&task.id, 10).unwrap(), executions_first);
    assert_eq!(after_first.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_cancel_discards_late_completion() {
    let h = Harness::new();
    let task = h.task(&[("a", CallMode::Async, 0), ("b", CallMode::Sync, 0)]);
    h.executor.advance(&task.id, t0()).await.unwrap();
    let token = h.token(&task);

    h.executor.cancel(&task.id, t0()).await.unwrap();
    let outcome = h
        .executor
        .on_complete(&token, SyncResult::success("too late"), t0())
        .await
        .unwrap();
    assert_eq!(outcome, CompletionOutcome::Discarded);

    let task = h.reload(&task);
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.step_to_execute, 0);
    assert!(task.steps[0].pending_token.is_none());

    let entries = h.store.list_executions(&task.id, 10).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, ExecutionStatus::Failed);
    assert_eq!(entries[0].result.as_deref(), Some(DISCARDED_RESULT));

    // Nothing moves a cancelled task.
    h.executor.advance(&task.id, t0()).await.unwrap();
    assert_eq!(h.runner.invocation_count(), 1);
}

#[tokio::test]
async fn test_lost_completion_times_out() {
    let h = Harness::new();
    let task = h.task(&[("a", CallMode::Async, 0)]);
    h.executor.advance(&task.id, t0()).await.unwrap();

    let early = h.dispatcher.tick(t0() + Duration::seconds(59)).await;
    assert_eq!(early.timed_out, 0);

    let late = h.dispatcher.tick(t0() + Duration::seconds(60)).await;
    assert_eq!(late.timed_out, 1);

    let task = h.reload(&task);
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.steps[0].status, StepStatus::Failed);
    let entries = h.store.list_executions(&task.id, 1).unwrap();
    assert!(entries[0].result.as_deref().unwrap().starts_with("TimeoutError"));
}

#[tokio::test]
async fn test_run_next_after_defers_to_later_tick() {
    let h = Harness::new();
    let task = h.task(&[("a", CallMode::Sync, 0), ("b", CallMode::Sync, 30)]);

    let task = h.executor.advance(&task.id, t0()).await.unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.step_to_execute, 1);
    assert_eq!(task.next_step_at, Some(t0() + Duration::seconds(30)));

    assert_eq!(h.dispatcher.tick(t0() + Duration::seconds(10)).await.resumed, 0);
    assert_eq!(h.runner.invocation_count(), 1);

    assert_eq!(h.dispatcher.tick(t0() + Duration::seconds(30)).await.resumed, 1);
    let task = h.reload(&task);
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.step_to_execute, 2);
}

#[tokio::test]
async fn test_overlapping_occurrence_is_skipped() {
    let h = Harness::new();
    let task = h.task(&[("a", CallMode::Async, 0)]);
    let id = h.schedule(&task, None, 10, t0());

    assert_eq!(h.dispatcher.tick(t0()).await.dispatched, 1);
    let t1 = t0() + Duration::seconds(10);
    let report = h.dispatcher.tick(t1).await;
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.skipped, 1);

    let schedule = h.store.get_schedule(&id).unwrap();
    assert_eq!(schedule.last_run_at, Some(t1));
    assert_eq!(h.runner.invocation_count(), 1);
}

#[tokio::test]
async fn test_tick_continues_after_failures() {
    let h = Harness::new();
    h.runner.raise("bad", "kaboom");
    let bad = h.task(&[("bad", CallMode::Sync, 0)]);
    let good = h.task(&[("good", CallMode::Sync, 0)]);
    h.schedule(&bad, None, 0, t0());
    h.schedule(&good, None, 0, t0());

    let report = h.dispatcher.tick(t0()).await;
    assert_eq!(report.dispatched, 2);
    assert_eq!(report.errors, 0);
    assert_eq!(h.reload(&bad).status, TaskStatus::Failed);
    assert_eq!(h.reload(&good).status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_progress_never_moves_backwards() {
    let h = Harness::new();
    let task = h.task(&[
        ("a", CallMode::Sync, 0),
        ("b", CallMode::Async, 0),
        ("c", CallMode::Sync, 5),
    ]);
    let mut seen = vec![h.reload(&task).step_to_execute];

    h.executor.advance(&task.id, t0()).await.unwrap();
    seen.push(h.reload(&task).step_to_execute);
    let token = h.token(&h.reload(&task));
    h.executor
        .on_complete(&token, SyncResult::success(""), t0())
        .await
        .unwrap();
    seen.push(h.reload(&task).step_to_execute);
    h.dispatcher.tick(t0() + Duration::seconds(5)).await;
    seen.push(h.reload(&task).step_to_execute);

    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert!(seen.iter().all(|&s| s <= 3));
    assert_eq!(seen.last(), Some(&3));
}

#[tokio::test]
async fn test_pending_token_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cadence.db");

    let (task_id, token) = {
        let h = Harness::with_store(Arc::new(TaskStore::open(&path).unwrap()));
        let task = h.task(&[("a", CallMode::Async, 0), ("b", CallMode::Sync, 0)]);
        h.executor.advance(&task.id, t0()).await.unwrap();
        (task.id.clone(), h.token(&task))
    };

    let h = Harness::with_store(Arc::new(TaskStore::open(&path).unwrap()));
    let outcome = h
        .executor
        .on_complete(&token, SyncResult::success("after restart"), t0())
        .await
        .unwrap();
    assert!(matches!(outcome, CompletionOutcome::Applied(_)));
    let task = h.store.get_task(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.step_to_execute, 2);
}

#[tokio::test]
async fn test_stalled_task_is_resumed_by_recover() {
    let h = Harness::new();
    let task = h.task(&[("a", CallMode::Sync, 0), ("b", CallMode::Sync, 0)]);
    h.schedule(&task, Some(t0()), 60, t0());

    // A run that stopped after persisting step 0 but before starting step 1.
    let mut stalled = h.reload(&task);
    stalled.status = TaskStatus::Running;
    stalled.step_to_execute = 1;
    stalled.steps[0].status = StepStatus::Completed;
    h.store.save_task(&stalled).unwrap();

    // Ticks alone only see an occurrence overlapping a running task.
    for offset in [0, 60, 120] {
        let report = h.dispatcher.tick(t0() + Duration::seconds(offset)).await;
        assert_eq!(report.skipped, 1);
    }
    assert_eq!(h.reload(&task).status, TaskStatus::Running);

    assert_eq!(h.dispatcher.recover(t0() + Duration::seconds(130)).await, 1);
    let task = h.reload(&task);
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.step_to_execute, 2);
    assert_eq!(h.runner.invocations().len(), 1);

    // Nothing left to recover; the next occurrence starts a fresh run.
    assert_eq!(h.dispatcher.recover(t0() + Duration::seconds(140)).await, 0);
    let report = h.dispatcher.tick(t0() + Duration::seconds(180)).await;
    assert_eq!(report.dispatched, 1);
    assert_eq!(h.reload(&task).executions_count, task.executions_count + 1);
}

#[tokio::test]
async fn test_recover_leaves_waiting_and_deferred_tasks_alone() {
    let h = Harness::new();
    let waiting = h.task(&[("remote", CallMode::Async, 0)]);
    h.executor.advance(&waiting.id, t0()).await.unwrap();
    let deferred = h.task(&[("a", CallMode::Sync, 0), ("b", CallMode::Sync, 300)]);
    h.executor.advance(&deferred.id, t0()).await.unwrap();
    assert!(h.reload(&deferred).next_step_at.is_some());

    assert_eq!(h.dispatcher.recover(t0() + Duration::seconds(1)).await, 0);
    assert_eq!(h.reload(&waiting).status, TaskStatus::Running);
    assert_eq!(h.reload(&deferred).step_to_execute, 1);
}

fn quick_manager() -> (TaskManager, Arc<MockRunner>) {
    let (tx, rx) = completion_channel();
    let runner = Arc::new(MockRunner::new().with_completions(tx));
    let store = Arc::new(TaskStore::open_in_memory().unwrap());
    let config = TaskManagerConfig {
        dispatcher: DispatcherConfig {
            tick_interval: StdDuration::from_millis(20),
            async_timeout: StdDuration::from_secs(3600),
        },
        autostart: true,
    };
    let manager = TaskManager::new(store, runner.clone(), config).with_completions(rx);
    (manager, runner)
}

#[tokio::test]
async fn test_completion_channel_drives_task() {
    let (manager, runner) = quick_manager();
    manager.init().await;
    manager.register_codex("remote", "true", None).unwrap();
    let task_id = manager
        .create_task("remote-job", "", &[StepConfig::asynchronous("remote")])
        .unwrap();

    manager.run_task_now(&task_id).await.unwrap();
    assert_eq!(runner.complete_all().len(), 1);

    let mut status = manager.get_task_status(&task_id).unwrap();
    for _ in 0..100 {
        if status.status == TaskStatus::Completed {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        status = manager.get_task_status(&task_id).unwrap();
    }
    assert_eq!(status.status, TaskStatus::Completed);
    assert_eq!(status.step_to_execute, 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_independent_dispatchers() {
    let (first, _) = quick_manager();
    let (second, _) = quick_manager();

    first.init().await;
    second.init().await;
    assert!(first.is_dispatcher_running().await);
    assert!(second.is_dispatcher_running().await);

    first.shutdown().await;
    assert!(!first.is_dispatcher_running().await);
    assert!(second.is_dispatcher_running().await);

    second.shutdown().await;
    assert!(!second.is_dispatcher_running().await);

    // Restart after stop.
    assert!(first.start_dispatcher().await);
    first.shutdown().await;
}

#[tokio::test]
async fn test_stop_task_from_any_live_state() {
    let (manager, _) = quick_manager();
    manager.register_codex("a", "true", None).unwrap();

    let pending = manager
        .create_task("p", "", &[StepConfig::sync("a")])
        .unwrap();
    manager.stop_task(&pending).await.unwrap();
    assert_eq!(
        manager.get_task_status(&pending).unwrap().status,
        TaskStatus::Cancelled
    );

    let waiting = manager
        .create_task("w", "", &[StepConfig::asynchronous("a")])
        .unwrap();
    manager.run_task_now(&waiting).await.unwrap();
    manager.stop_task(&waiting).await.unwrap();
    assert_eq!(
        manager.get_task_status(&waiting).unwrap().status,
        TaskStatus::Cancelled
    );

    // Already cancelled counts as terminal.
    assert!(manager.stop_task(&waiting).await.is_err());
    assert!(manager.run_task_now(&waiting).await.is_err());
}

async fn wait_for_status(manager: &TaskManager, task_id: &str, want: TaskStatus) -> TaskStatus {
    let mut status = manager.get_task_status(task_id).unwrap().status;
    for _ in 0..100 {
        if status == want {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        status = manager.get_task_status(task_id).unwrap().status;
    }
    status
}

#[tokio::test]
async fn test_completions_survive_dispatcher_restart() {
    let (manager, runner) = quick_manager();
    manager.register_codex("remote", "true", None).unwrap();

    manager.init().await;
    manager.shutdown().await;
    assert!(manager.start_dispatcher().await);

    let task_id = manager
        .create_task("after-restart", "", &[StepConfig::asynchronous("remote")])
        .unwrap();
    manager.run_task_now(&task_id).await.unwrap();
    assert_eq!(runner.complete_all().len(), 1);

    let status = wait_for_status(&manager, &task_id, TaskStatus::Completed).await;
    assert_eq!(status, TaskStatus::Completed);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_dispatcher_start_resumes_stalled_task() {
    let (manager, runner) = quick_manager();
    manager.register_codex("a", "true", None).unwrap();
    let task_id = manager
        .create_task("interrupted", "", &[StepConfig::sync("a"), StepConfig::sync("a")])
        .unwrap();

    let mut task = manager.get_task(&task_id).unwrap();
    task.status = TaskStatus::Running;
    task.step_to_execute = 1;
    task.steps[0].status = StepStatus::Completed;
    manager.store().save_task(&task).unwrap();

    manager.init().await;
    let status = wait_for_status(&manager, &task_id, TaskStatus::Completed).await;
    assert_eq!(status, TaskStatus::Completed);
    assert_eq!(runner.invocations().len(), 1);
    manager.shutdown().await;
}
