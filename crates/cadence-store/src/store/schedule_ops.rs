//! Schedule operations.

use cadence_types::{TaskSchedule, Timestamp, new_id};
use rusqlite::{OptionalExtension, params};
use tracing::debug;

use super::{NewSchedule, TaskStore, fmt_opt_ts, fmt_ts, opt_ts_col, ts_col, u64_col};
use crate::{Result, StoreError};

const SCHEDULE_COLUMNS: &str = "id, name, task_id, run_at, repeat_every, last_run_at, \
                                next_run_at, disabled, created_at, updated_at";

impl TaskStore {
    /// Bind a task to a recurrence. The task must exist at creation time.
    pub fn create_schedule(&self, new: &NewSchedule, now: Timestamp) -> Result<TaskSchedule> {
        if i64::try_from(new.repeat_every).is_err() {
            return Err(StoreError::Validation(format!(
                "repeat_every out of range: {}",
                new.repeat_every
            )));
        }

        let conn = self.conn();
        let task_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?1)",
            params![new.task_id],
            |row| row.get(0),
        )?;
        if !task_exists {
            return Err(StoreError::not_found("task", new.task_id.clone()));
        }

        let schedule = TaskSchedule {
            id: new_id(),
            name: new.name.clone(),
            task_id: new.task_id.clone(),
            run_at: new.run_at,
            repeat_every: new.repeat_every,
            last_run_at: None,
            next_run_at: Some(TaskSchedule::initial_next_run(new.run_at, now)),
            disabled: false,
            created_at: now,
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO task_schedules (id, name, task_id, run_at, repeat_every, last_run_at,
                                         next_run_at, disabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, 0, ?7, ?7)",
            params![
                schedule.id,
                schedule.name,
                schedule.task_id,
                fmt_opt_ts(schedule.run_at.as_ref()),
                schedule.repeat_every as i64,
                fmt_opt_ts(schedule.next_run_at.as_ref()),
                fmt_ts(&now),
            ],
        )?;

        debug!(
            schedule_id = %schedule.id,
            task_id = %schedule.task_id,
            repeat_every = schedule.repeat_every,
            "Created schedule"
        );
        Ok(schedule)
    }

    pub fn get_schedule(&self, id: &str) -> Result<TaskSchedule> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {SCHEDULE_COLUMNS} FROM task_schedules WHERE id = ?1"),
            params![id],
            row_to_schedule,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("schedule", id))
    }

    /// Page through schedules, newest first.
    pub fn list_schedules(&self, offset: usize, limit: usize) -> Result<Vec<TaskSchedule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM task_schedules
             ORDER BY created_at DESC, rowid DESC LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], row_to_schedule)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn count_schedules(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM task_schedules", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    pub fn schedules_for_task(&self, task_id: &str) -> Result<Vec<TaskSchedule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM task_schedules
             WHERE task_id = ?1 ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map(params![task_id], row_to_schedule)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn set_schedule_disabled(&self, id: &str, disabled: bool, now: Timestamp) -> Result<()> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE task_schedules SET disabled = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, disabled, fmt_ts(&now)],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("schedule", id));
        }
        debug!(schedule_id = %id, disabled, "Toggled schedule");
        Ok(())
    }

    /// Record a dispatch at `now`: `last_run_at = now`, and `next_run_at`
    /// moves to `now + repeat_every` (or clears for a one-shot).
    pub fn mark_schedule_dispatched(&self, id: &str, now: Timestamp) -> Result<TaskSchedule> {
        let mut schedule = self.get_schedule(id)?;
        schedule.mark_dispatched(now);

        let conn = self.conn();
        conn.execute(
            "UPDATE task_schedules SET last_run_at = ?2, next_run_at = ?3, updated_at = ?4
             WHERE id = ?1",
            params![
                schedule.id,
                fmt_opt_ts(schedule.last_run_at.as_ref()),
                fmt_opt_ts(schedule.next_run_at.as_ref()),
                fmt_ts(&schedule.updated_at),
            ],
        )?;
        Ok(schedule)
    }

    pub fn delete_schedule(&self, id: &str) -> Result<()> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM task_schedules WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(StoreError::not_found("schedule", id));
        }
        debug!(schedule_id = %id, "Deleted schedule");
        Ok(())
    }

    /// Enabled schedules whose `next_run_at` is at or before `now`, earliest first.
    pub fn list_due_schedules(&self, now: Timestamp) -> Result<Vec<TaskSchedule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM task_schedules
             WHERE disabled = 0 AND next_run_at IS NOT NULL AND next_run_at <= ?1
             ORDER BY next_run_at ASC"
        ))?;
        let rows = stmt.query_map(params![fmt_ts(&now)], row_to_schedule)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }
}

fn row_to_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskSchedule> {
    Ok(TaskSchedule {
        id: row.get(0)?,
        name: row.get(1)?,
        task_id: row.get(2)?,
        run_at: opt_ts_col(row, 3)?,
        repeat_every: u64_col(row, 4)?,
        last_run_at: opt_ts_col(row, 5)?,
        next_run_at: opt_ts_col(row, 6)?,
        disabled: row.get(7)?,
        created_at: ts_col(row, 8)?,
        updated_at: ts_col(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewStep;
    use cadence_types::CallMode;
    use chrono::{Duration, TimeZone, Utc};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn store_with_task() -> (TaskStore, String) {
        let store = TaskStore::open_in_memory().expect("failed to create test store");
        let codex = store.create_codex("c", "true", None, t0()).unwrap();
        let task = store
            .create_task(
                "t",
                "",
                &[NewStep {
                    codex_id: codex.id,
                    mode: CallMode::Sync,
                    run_next_after: 0,
                }],
                t0(),
            )
            .unwrap();
        (store, task.id)
    }

    fn new_schedule(task_id: &str, run_at: Option<Timestamp>, repeat_every: u64) -> NewSchedule {
        NewSchedule {
            name: "sched".into(),
            task_id: task_id.to_string(),
            run_at,
            repeat_every,
        }
    }

    #[test]
    fn test_create_schedule_defaults_next_run_to_now() {
        let (store, task_id) = store_with_task();
        let schedule = store
            .create_schedule(&new_schedule(&task_id, None, 60), t0())
            .unwrap();
        assert_eq!(schedule.next_run_at, Some(t0()));

        let later = t0() + Duration::seconds(300);
        let schedule = store
            .create_schedule(&new_schedule(&task_id, Some(later), 60), t0())
            .unwrap();
        let loaded = store.get_schedule(&schedule.id).unwrap();
        assert_eq!(loaded.next_run_at, Some(later));
        assert_eq!(loaded.run_at, Some(later));
    }

    #[test]
    fn test_create_schedule_requires_task() {
        let (store, _) = store_with_task();
        let err = store
            .create_schedule(&new_schedule("missing", None, 0), t0())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "task", .. }));
    }

    #[test]
    fn test_due_schedules_exclude_disabled() {
        let (store, task_id) = store_with_task();
        let schedule = store
            .create_schedule(&new_schedule(&task_id, Some(t0()), 60), t0())
            .unwrap();
        assert_eq!(store.list_due_schedules(t0()).unwrap().len(), 1);
        assert!(store
            .list_due_schedules(t0() - Duration::seconds(1))
            .unwrap()
            .is_empty());

        store.set_schedule_disabled(&schedule.id, true, t0()).unwrap();
        assert!(store
            .list_due_schedules(t0() + Duration::days(30))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_mark_dispatched_one_shot() {
        let (store, task_id) = store_with_task();
        let schedule = store
            .create_schedule(&new_schedule(&task_id, Some(t0()), 0), t0())
            .unwrap();

        let updated = store.mark_schedule_dispatched(&schedule.id, t0()).unwrap();
        assert_eq!(updated.last_run_at, Some(t0()));
        assert!(updated.next_run_at.is_none());
        assert!(store
            .list_due_schedules(t0() + Duration::days(1))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_mark_dispatched_recurring() {
        let (store, task_id) = store_with_task();
        let schedule = store
            .create_schedule(&new_schedule(&task_id, Some(t0()), 3600), t0())
            .unwrap();
        let fired = t0() + Duration::seconds(3600);

        store.mark_schedule_dispatched(&schedule.id, fired).unwrap();
        let loaded = store.get_schedule(&schedule.id).unwrap();
        assert_eq!(loaded.last_run_at, Some(fired));
        assert_eq!(loaded.next_run_at, Some(fired + Duration::seconds(3600)));
    }

    #[test]
    fn test_schedules_survive_task_delete() {
        let (store, task_id) = store_with_task();
        store
            .create_schedule(&new_schedule(&task_id, None, 0), t0())
            .unwrap();
        store.delete_task(&task_id).unwrap();
        assert_eq!(store.schedules_for_task(&task_id).unwrap().len(), 1);
        assert_eq!(store.count_schedules().unwrap(), 1);
    }

    #[test]
    fn test_delete_schedule() {
        let (store, task_id) = store_with_task();
        let schedule = store
            .create_schedule(&new_schedule(&task_id, None, 0), t0())
            .unwrap();
        store.delete_schedule(&schedule.id).unwrap();
        assert!(store.get_schedule(&schedule.id).is_err());
        assert!(store.delete_schedule(&schedule.id).is_err());
        assert!(store.list_schedules(0, 10).unwrap().is_empty());
    }
}
