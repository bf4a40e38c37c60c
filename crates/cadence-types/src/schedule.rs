//! Recurrence bindings that trigger tasks.

use serde::{Deserialize, Serialize};

use crate::{Id, Timestamp, add_secs};

/// Triggers a task at due times.
///
/// `next_run_at` is the persisted due key: `None` means the schedule will
/// never fire again (a one-shot that already ran).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSchedule {
    pub id: Id,
    pub name: String,
    pub task_id: Id,
    /// First due time; `None` means as soon as possible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<Timestamp>,
    /// Seconds between runs; 0 means one-shot.
    pub repeat_every: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<Timestamp>,
    pub disabled: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TaskSchedule {
    pub fn is_one_shot(&self) -> bool {
        self.repeat_every == 0
    }

    /// Due key for a freshly created schedule.
    pub fn initial_next_run(run_at: Option<Timestamp>, created_at: Timestamp) -> Timestamp {
        run_at.unwrap_or(created_at)
    }

    /// Returns `true` if the schedule should be dispatched at `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        if self.disabled {
            return false;
        }
        self.next_run_at.is_some_and(|next| next <= now)
    }

    /// Due key after a dispatch at `now`.
    ///
    /// Missed intervals are not replayed: the next occurrence is measured
    /// from `now`, not from the previous due time. An interval that would
    /// land past the last representable timestamp also yields `None`.
    pub fn next_run_after_dispatch(&self, now: Timestamp) -> Option<Timestamp> {
        if self.is_one_shot() {
            None
        } else {
            add_secs(now, self.repeat_every)
        }
    }

    /// Record a dispatch at `now`.
    pub fn mark_dispatched(&mut self, now: Timestamp) {
        self.last_run_at = Some(now);
        self.next_run_at = self.next_run_after_dispatch(now);
        self.updated_at = now;
    }

    /// Human-readable recurrence, e.g. `every 2 hours`.
    pub fn interval_label(&self) -> String {
        let secs = self.repeat_every;
        match secs {
            0 => "once".to_string(),
            s if s % 86400 == 0 => format!("every {} days", s / 86400),
            s if s % 3600 == 0 => format!("every {} hours", s / 3600),
            s if s % 60 == 0 => format!("every {} minutes", s / 60),
            s => format!("every {s} seconds"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::now;
    use chrono::Duration;

    fn schedule(repeat_every: u64, next_run_at: Option<Timestamp>) -> TaskSchedule {
        let created = now();
        TaskSchedule {
            id: "sch".into(),
            name: "sch".into(),
            task_id: "t".into(),
            run_at: None,
            repeat_every,
            last_run_at: None,
            next_run_at,
            disabled: false,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn test_due_when_next_run_passed() {
        let t0 = now();
        let s = schedule(60, Some(t0));
        assert!(s.is_due(t0));
        assert!(s.is_due(t0 + Duration::seconds(1)));
        assert!(!s.is_due(t0 - Duration::seconds(1)));
    }

    #[test]
    fn test_disabled_never_due() {
        let t0 = now();
        let mut s = schedule(60, Some(t0));
        s.disabled = true;
        assert!(!s.is_due(t0 + Duration::days(365)));
    }

    #[test]
    fn test_one_shot_fires_once() {
        let t0 = now();
        let mut s = schedule(0, Some(t0));
        assert!(s.is_due(t0));
        s.mark_dispatched(t0);
        assert_eq!(s.last_run_at, Some(t0));
        assert!(s.next_run_at.is_none());
        assert!(!s.is_due(t0 + Duration::days(1)));
    }

    #[test]
    fn test_recurring_skips_to_now() {
        let t0 = now();
        let mut s = schedule(3600, Some(t0));
        // Ten intervals late: fires once and re-anchors on `late`.
        let late = t0 + Duration::seconds(36_000);
        s.mark_dispatched(late);
        assert_eq!(s.last_run_at, Some(late));
        assert_eq!(s.next_run_at, Some(late + Duration::seconds(3600)));
        assert!(!s.is_due(late + Duration::seconds(3599)));
        assert!(s.is_due(late + Duration::seconds(3600)));
    }

    #[test]
    fn test_huge_interval_does_not_overflow() {
        let t0 = now();
        let mut s = schedule(u64::MAX, Some(t0));
        s.mark_dispatched(t0);
        assert_eq!(s.last_run_at, Some(t0));
        assert!(s.next_run_at.is_none());
    }

    #[test]
    fn test_interval_label() {
        assert_eq!(schedule(0, None).interval_label(), "once");
        assert_eq!(schedule(86400, None).interval_label(), "every 1 days");
        assert_eq!(schedule(7200, None).interval_label(), "every 2 hours");
        assert_eq!(schedule(1800, None).interval_label(), "every 30 minutes");
        assert_eq!(schedule(45, None).interval_label(), "every 45 seconds");
    }
}
