//! Shared types for the Cadence task scheduler.
//!
//! Every record is addressed by a stable string id; cross references
//! (step → call → codex, schedule → task) are id lookups into the store,
//! never in-memory pointers.

pub mod codex;
pub mod execution;
pub mod schedule;
pub mod task;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};

pub use codex::{Call, CallMode, Codex};
pub use execution::{Execution, ExecutionStatus};
pub use schedule::TaskSchedule;
pub use task::{StepStatus, Task, TaskStatus, TaskStep};

/// Opaque record identifier.
pub type Id = String;

/// UTC timestamp used on every persisted record.
pub type Timestamp = DateTime<Utc>;

/// Generate a fresh record id.
pub fn new_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}

/// Largest delay or interval accepted anywhere, in seconds (about a century).
pub const MAX_DELAY_SECS: u64 = 100 * 365 * 86_400;

/// Current time at millisecond precision, matching what the store persists.
pub fn now() -> Timestamp {
    Utc::now().trunc_subsecs(3)
}

/// `ts + secs`, or `None` when the result does not fit a timestamp.
pub fn add_secs(ts: Timestamp, secs: u64) -> Option<Timestamp> {
    let secs = i64::try_from(secs).ok()?;
    ts.checked_add_signed(TimeDelta::try_seconds(secs)?)
}

/// Error returned when a persisted status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} status: {value}")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseStatusError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_now_has_millisecond_precision() {
        let ts = now();
        assert_eq!(ts.nanosecond() % 1_000_000, 0);
    }

    #[test]
    fn test_add_secs_overflow_is_none() {
        let ts = now();
        assert_eq!(add_secs(ts, 60), Some(ts + TimeDelta::seconds(60)));
        assert_eq!(add_secs(ts, u64::MAX), None);
        assert_eq!(add_secs(ts, i64::MAX as u64), None);
        assert!(add_secs(ts, MAX_DELAY_SECS).is_some());
    }
}
