//! Entity store for the Cadence task scheduler.
//!
//! Holds codices, calls, tasks, their steps, schedules and the execution
//! log in SQLite. Every write is atomic per entity; task creation writes
//! the steps and the task row in one transaction so a task is never
//! visible without its steps.

pub mod error;
pub mod store;

pub use error::{Result, StoreError};
pub use store::{NewSchedule, NewStep, TaskStore, payload_checksum};
