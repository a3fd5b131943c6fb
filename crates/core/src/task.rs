//! Task lifecycle state machine.
//!
//! A task moves `Received -> InProgress -> {Done | Failed}`. The terminal
//! transition is idempotent: however many completion signals arrive for a
//! task, only the first one produces a [`TaskUpdate`].

use crate::protocol::TaskUpdate;
use crate::types::TaskId;

/// How a task's process ended, as reported by process supervision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The process ran and exited. `code` is `None` when it was
    /// terminated by a signal.
    Exited { code: Option<i32> },
    /// The process could not be started or waited on.
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Received,
    InProgress,
    Done { success: bool, exit_code: Option<i32> },
    Failed { error: String },
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Failed { .. })
    }
}

/// A task's identity plus its current state.
#[derive(Debug, Clone)]
pub struct TaskLifecycle {
    task_id: TaskId,
    state: TaskState,
}

impl TaskLifecycle {
    /// Create a task in the `Received` state, returning the update that
    /// acknowledges it.
    pub fn receive(task_id: impl Into<TaskId>) -> (Self, TaskUpdate) {
        let task_id = task_id.into();
        let update = TaskUpdate::received(&task_id);
        (
            Self {
                task_id,
                state: TaskState::Received,
            },
            update,
        )
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    /// Mark the process as started. Only valid from `Received`.
    pub fn start(&mut self) -> Option<TaskUpdate> {
        if self.state != TaskState::Received {
            return None;
        }
        self.state = TaskState::InProgress;
        Some(TaskUpdate::in_progress(&self.task_id))
    }

    /// Apply the terminal transition.
    ///
    /// Returns the terminal update the first time; every later call is a
    /// no-op returning `None`.
    pub fn complete(&mut self, outcome: TaskOutcome) -> Option<TaskUpdate> {
        if self.state.is_terminal() {
            return None;
        }
        let update = match outcome {
            TaskOutcome::Exited { code } => {
                self.state = TaskState::Done {
                    success: code == Some(0),
                    exit_code: code,
                };
                TaskUpdate::exited(&self.task_id, code)
            }
            TaskOutcome::Error { message } => {
                let update = TaskUpdate::failed(&self.task_id, message.clone());
                self.state = TaskState::Failed { error: message };
                update
            }
        };
        Some(update)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
