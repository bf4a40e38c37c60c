//! Tasks and their ordered steps.

use serde::{Deserialize, Serialize};

use crate::{CallMode, Id, ParseStatusError, Timestamp};

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled tasks make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ParseStatusError::new("task", other)),
        }
    }
}

/// Status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ParseStatusError::new("step", other)),
        }
    }
}

/// One ordered unit of work inside a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStep {
    pub id: Id,
    pub task_id: Id,
    /// Zero-based index within the owning task.
    pub position: usize,
    pub call_id: Id,
    pub status: StepStatus,
    /// Seconds to wait after the previous step completes before this one runs.
    pub run_next_after: u64,
    pub mode: CallMode,
    /// Correlation token of an outstanding async invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_since: Option<Timestamp>,
}

impl TaskStep {
    /// True while an async invocation for this step is outstanding.
    pub fn is_awaiting_completion(&self) -> bool {
        self.status == StepStatus::Running && self.pending_token.is_some()
    }

    /// Return the step to its initial state for a fresh run.
    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.pending_token = None;
        self.pending_since = None;
    }
}

/// An ordered sequence of steps plus run metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Id,
    pub name: String,
    /// Free-form caller metadata.
    #[serde(default)]
    pub metadata: String,
    pub status: TaskStatus,
    /// Index of the next step to run. Never exceeds `steps.len()`.
    pub step_to_execute: usize,
    /// Number of runs started for this task.
    pub executions_count: u64,
    /// Earliest time the current step may run, set by a `run_next_after` delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub steps: Vec<TaskStep>,
}

impl Task {
    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    /// The step `step_to_execute` points at, if any remain.
    pub fn current_step(&self) -> Option<&TaskStep> {
        self.steps.get(self.step_to_execute)
    }

    pub fn current_step_mut(&mut self) -> Option<&mut TaskStep> {
        self.steps.get_mut(self.step_to_execute)
    }

    pub fn all_steps_done(&self) -> bool {
        self.step_to_execute >= self.steps.len()
    }

    pub fn has_failed_step(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepStatus::Failed)
    }

    /// True while the current step waits on an async completion.
    pub fn is_awaiting_completion(&self) -> bool {
        self.current_step()
            .is_some_and(TaskStep::is_awaiting_completion)
    }

    /// Re-arm the task for a new run from the first step.
    pub fn reset_for_run(&mut self) {
        for step in &mut self.steps {
            step.reset();
        }
        self.step_to_execute = 0;
        self.next_step_at = None;
        self.status = TaskStatus::Pending;
        self.executions_count += 1;
    }
}
