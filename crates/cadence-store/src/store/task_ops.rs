//! Task and step operations, including the due queries the dispatcher uses.

use std::time::Duration;

use cadence_types::{StepStatus, Task, TaskStatus, TaskStep, Timestamp, new_id};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::{
    NewStep, TaskStore, enum_col, fmt_opt_ts, fmt_ts, opt_ts_col, ts_col, u64_col,
};
use crate::{Result, StoreError};

const TASK_COLUMNS: &str = "id, name, metadata, status, step_to_execute, executions_count, \
                            next_step_at, created_at, updated_at";

const STEP_COLUMNS: &str = "id, task_id, position, call_id, status, run_next_after, mode, \
                            pending_token, pending_since";

impl TaskStore {
    /// Create a task together with its calls and steps.
    ///
    /// Every referenced codex must exist. Steps are inserted before the task
    /// row is marked `pending`, all inside one transaction.
    pub fn create_task(
        &self,
        name: &str,
        metadata: &str,
        steps: &[NewStep],
        now: Timestamp,
    ) -> Result<Task> {
        if name.trim().is_empty() {
            return Err(StoreError::Validation("task name must not be empty".into()));
        }
        if steps.is_empty() {
            return Err(StoreError::Validation(
                "task must have at least one step".into(),
            ));
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let task_id = new_id();
        let created = fmt_ts(&now);

        // The row exists (so steps can reference it) but is not yet pending.
        tx.execute(
            "INSERT INTO tasks (id, name, metadata, status, step_to_execute, executions_count,
                                next_step_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'creating', 0, 0, NULL, ?4, ?4)",
            params![task_id, name, metadata, created],
        )?;

        let mut task_steps = Vec::with_capacity(steps.len());
        for (position, step) in steps.iter().enumerate() {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM codices WHERE id = ?1)",
                params![step.codex_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(StoreError::not_found("codex", step.codex_id.clone()));
            }

            let call_id = new_id();
            tx.execute(
                "INSERT INTO calls (id, codex_id, mode) VALUES (?1, ?2, ?3)",
                params![call_id, step.codex_id, step.mode.as_str()],
            )?;

            let task_step = TaskStep {
                id: new_id(),
                task_id: task_id.clone(),
                position,
                call_id,
                status: StepStatus::Pending,
                run_next_after: step.run_next_after,
                mode: step.mode,
                pending_token: None,
                pending_since: None,
            };
            tx.execute(
                "INSERT INTO task_steps (id, task_id, position, call_id, status, run_next_after,
                                         mode, pending_token, pending_since)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL)",
                params![
                    task_step.id,
                    task_step.task_id,
                    task_step.position as i64,
                    task_step.call_id,
                    task_step.status.as_str(),
                    task_step.run_next_after as i64,
                    task_step.mode.as_str(),
                ],
            )?;
            task_steps.push(task_step);
        }

        tx.execute(
            "UPDATE tasks SET status = ?2 WHERE id = ?1",
            params![task_id, TaskStatus::Pending.as_str()],
        )?;
        tx.commit()?;

        debug!(task_id = %task_id, steps = task_steps.len(), "Created task");
        Ok(Task {
            id: task_id,
            name: name.to_string(),
            metadata: metadata.to_string(),
            status: TaskStatus::Pending,
            step_to_execute: 0,
            executions_count: 0,
            next_step_at: None,
            created_at: now,
            updated_at: now,
            steps: task_steps,
        })
    }

    /// Load a task with its steps in position order.
    pub fn get_task(&self, id: &str) -> Result<Task> {
        let conn = self.conn();
        load_task(&conn, id)?.ok_or_else(|| StoreError::not_found("task", id))
    }

    /// Page through tasks, newest first.
    pub fn list_tasks(&self, offset: usize, limit: usize) -> Result<Vec<Task>> {
        let conn = self.conn();
        let ids = {
            let mut stmt = conn.prepare(
                "SELECT id FROM tasks WHERE status != 'creating'
                 ORDER BY created_at DESC, rowid DESC LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt.query_map(params![limit as i64, offset as i64], |row| {
                row.get::<_, String>(0)
            })?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        collect_tasks(&conn, &ids)
    }

    pub fn count_tasks(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE status != 'creating'",
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    /// Persist a task's progress fields and all of its steps atomically.
    pub fn save_task(&self, task: &Task) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE tasks
             SET status = ?2, step_to_execute = ?3, executions_count = ?4,
                 next_step_at = ?5, updated_at = ?6
             WHERE id = ?1",
            params![
                task.id,
                task.status.as_str(),
                task.step_to_execute as i64,
                task.executions_count as i64,
                fmt_opt_ts(task.next_step_at.as_ref()),
                fmt_ts(&task.updated_at),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("task", task.id.clone()));
        }
        for step in &task.steps {
            write_step(&tx, step)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Persist one step's mutable fields.
    pub fn save_step(&self, step: &TaskStep) -> Result<()> {
        let conn = self.conn();
        write_step(&conn, step)
    }

    /// Delete a task, its steps, their calls and its executions.
    ///
    /// Schedules pointing at the task are left in place.
    pub fn delete_task(&self, id: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let call_ids = {
            let mut stmt = tx.prepare("SELECT call_id FROM task_steps WHERE task_id = ?1")?;
            let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        let deleted = tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(StoreError::not_found("task", id));
        }
        for call_id in &call_ids {
            tx.execute("DELETE FROM calls WHERE id = ?1", params![call_id])?;
        }
        tx.commit()?;

        debug!(task_id = %id, "Deleted task");
        Ok(())
    }

    /// Find the step currently holding an async correlation token.
    pub fn find_step_by_token(&self, token: &str) -> Result<Option<TaskStep>> {
        let conn = self.conn();
        let step = conn
            .query_row(
                &format!("SELECT {STEP_COLUMNS} FROM task_steps WHERE pending_token = ?1"),
                params![token],
                row_to_step,
            )
            .optional()?;
        Ok(step)
    }

    // ── Due queries ─────────────────────────────────────────────────

    /// Tasks whose current async step has waited at least `timeout`.
    ///
    /// Cancelled tasks are included so their outstanding step can be closed.
    /// A timeout reaching before the earliest representable time matches
    /// nothing.
    pub fn list_due_async_tasks(&self, now: Timestamp, timeout: Duration) -> Result<Vec<Task>> {
        let Some(cutoff) = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|timeout| now.checked_sub_signed(timeout))
        else {
            return Ok(Vec::new());
        };
        let cutoff = fmt_ts(&cutoff);

        let conn = self.conn();
        let ids = {
            let mut stmt = conn.prepare(
                "SELECT t.id FROM tasks t
                 JOIN task_steps s ON s.task_id = t.id AND s.position = t.step_to_execute
                 WHERE t.status IN ('running', 'cancelled')
                   AND s.status = 'running'
                   AND s.pending_token IS NOT NULL
                   AND s.pending_since <= ?1
                 ORDER BY s.pending_since ASC",
            )?;
            let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        collect_tasks(&conn, &ids)
    }

    /// Running tasks parked on a `run_next_after` delay that has elapsed.
    pub fn list_due_deferred_tasks(&self, now: Timestamp) -> Result<Vec<Task>> {
        let conn = self.conn();
        let ids = {
            let mut stmt = conn.prepare(
                "SELECT t.id FROM tasks t
                 WHERE t.status = 'running'
                   AND t.next_step_at IS NOT NULL
                   AND t.next_step_at <= ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM task_steps s
                       WHERE s.task_id = t.id AND s.pending_token IS NOT NULL
                   )
                 ORDER BY t.next_step_at ASC",
            )?;
            let rows = stmt.query_map(params![fmt_ts(&now)], |row| row.get::<_, String>(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        collect_tasks(&conn, &ids)
    }

    /// Running tasks that nothing will move forward on its own: no
    /// outstanding async token and no pending `run_next_after` delay.
    ///
    /// Only a process that stopped mid-run leaves tasks in this state.
    pub fn list_stalled_tasks(&self) -> Result<Vec<Task>> {
        let conn = self.conn();
        let ids = {
            let mut stmt = conn.prepare(
                "SELECT t.id FROM tasks t
                 WHERE t.status = 'running'
                   AND t.next_step_at IS NULL
                   AND NOT EXISTS (
                       SELECT 1 FROM task_steps s
                       WHERE s.task_id = t.id AND s.pending_token IS NOT NULL
                   )
                 ORDER BY t.updated_at ASC",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        collect_tasks(&conn, &ids)
    }
}

// ── Row helpers ─────────────────────────────────────────────────────

fn write_step(conn: &Connection, step: &TaskStep) -> Result<()> {
    let changed = conn.execute(
        "UPDATE task_steps SET status = ?2, pending_token = ?3, pending_since = ?4 WHERE id = ?1",
        params![
            step.id,
            step.status.as_str(),
            step.pending_token,
            fmt_opt_ts(step.pending_since.as_ref()),
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::not_found("step", step.id.clone()));
    }
    Ok(())
}

fn load_task(conn: &Connection, id: &str) -> Result<Option<Task>> {
    let task = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1 AND status != 'creating'"),
            params![id],
            row_to_task,
        )
        .optional()?;

    let Some(mut task) = task else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {STEP_COLUMNS} FROM task_steps WHERE task_id = ?1 ORDER BY position ASC"
    ))?;
    let rows = stmt.query_map(params![id], row_to_step)?;
    task.steps = rows.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Some(task))
}

fn collect_tasks(conn: &Connection, ids: &[String]) -> Result<Vec<Task>> {
    let mut tasks = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(task) = load_task(conn, id)? {
            tasks.push(task);
        }
    }
    Ok(tasks)
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        name: row.get(1)?,
        metadata: row.get(2)?,
        status: enum_col(row, 3)?,
        step_to_execute: u64_col(row, 4)? as usize,
        executions_count: u64_col(row, 5)?,
        next_step_at: opt_ts_col(row, 6)?,
        created_at: ts_col(row, 7)?,
        updated_at: ts_col(row, 8)?,
        steps: Vec::new(),
    })
}

fn row_to_step(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskStep> {
    Ok(TaskStep {
        id: row.get(0)?,
        task_id: row.get(1)?,
        position: u64_col(row, 2)? as usize,
        call_id: row.get(3)?,
        status: enum_col(row, 4)?,
        run_next_after: u64_col(row, 5)?,
        mode: enum_col(row, 6)?,
        pending_token: row.get(7)?,
        pending_since: opt_ts_col(row, 8)?,
    })
}
