//! Execution log rows.

use cadence_types::{Execution, ExecutionStatus, Timestamp, new_id};
use rusqlite::{OptionalExtension, params};

use super::{TaskStore, enum_col, fmt_ts, ts_col};
use crate::{Result, StoreError};

const EXECUTION_COLUMNS: &str = "id, task_id, step_id, status, logs, result, created_at, updated_at";

impl TaskStore {
    /// Append a new `running` execution for a task (and optionally a step).
    pub fn insert_execution(
        &self,
        task_id: &str,
        step_id: Option<&str>,
        now: Timestamp,
    ) -> Result<Execution> {
        let execution = Execution {
            id: new_id(),
            task_id: task_id.to_string(),
            step_id: step_id.map(str::to_string),
            status: ExecutionStatus::Running,
            logs: String::new(),
            result: None,
            created_at: now,
            updated_at: now,
        };

        let conn = self.conn();
        conn.execute(
            "INSERT INTO executions (id, task_id, step_id, status, logs, result, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, '', NULL, ?5, ?5)",
            params![
                execution.id,
                execution.task_id,
                execution.step_id,
                execution.status.as_str(),
                fmt_ts(&now),
            ],
        )?;
        Ok(execution)
    }

    pub fn get_execution(&self, id: &str) -> Result<Execution> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = ?1"),
            params![id],
            row_to_execution,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("execution", id))
    }

    /// Append text to a non-terminal execution's log.
    ///
    /// Returns `false` when the execution is already terminal.
    pub fn append_execution_log(&self, id: &str, text: &str, now: Timestamp) -> Result<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE executions SET logs = logs || ?2, updated_at = ?3
             WHERE id = ?1 AND status IN ('pending', 'running')",
            params![id, text, fmt_ts(&now)],
        )?;
        if changed == 0 {
            ensure_execution_exists(&conn, id)?;
        }
        Ok(changed > 0)
    }

    /// Move a non-terminal execution to `status` with `result`.
    ///
    /// Returns `false` without touching the row when it is already terminal.
    pub fn finish_execution(
        &self,
        id: &str,
        status: ExecutionStatus,
        result: Option<&str>,
        now: Timestamp,
    ) -> Result<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE executions SET status = ?2, result = ?3, updated_at = ?4
             WHERE id = ?1 AND status IN ('pending', 'running')",
            params![id, status.as_str(), result, fmt_ts(&now)],
        )?;
        if changed == 0 {
            ensure_execution_exists(&conn, id)?;
        }
        Ok(changed > 0)
    }

    /// Most recent non-terminal execution recorded for a step.
    pub fn open_execution_for_step(&self, step_id: &str) -> Result<Option<Execution>> {
        let conn = self.conn();
        let execution = conn
            .query_row(
                &format!(
                    "SELECT {EXECUTION_COLUMNS} FROM executions
                     WHERE step_id = ?1 AND status IN ('pending', 'running')
                     ORDER BY seq DESC LIMIT 1"
                ),
                params![step_id],
                row_to_execution,
            )
            .optional()?;
        Ok(execution)
    }

    /// Executions for a task, newest first.
    pub fn list_executions(&self, task_id: &str, limit: usize) -> Result<Vec<Execution>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions
             WHERE task_id = ?1 ORDER BY seq DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![task_id, limit as i64], row_to_execution)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }
}

fn ensure_execution_exists(conn: &rusqlite::Connection, id: &str) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM executions WHERE id = ?1)",
        params![id],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(StoreError::not_found("execution", id))
    }
}

fn row_to_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<Execution> {
    Ok(Execution {
        id: row.get(0)?,
        task_id: row.get(1)?,
        step_id: row.get(2)?,
        status: enum_col(row, 3)?,
        logs: row.get(4)?,
        result: row.get(5)?,
        created_at: ts_col(row, 6)?,
        updated_at: ts_col(row, 7)?,
    })
}
