//! Orchestrator event-channel protocol.
//!
//! Every frame is a JSON envelope `{"event": "<name>", "data": {...}}`.
//! Payload fields use camelCase on the wire.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::identity::WorkerIdentity;
use crate::types::TaskId;

/// Worker → orchestrator: identity, sent on every connect.
pub const EVENT_ANNOUNCE: &str = "worker.announce";

/// Worker → orchestrator: task status transition.
pub const EVENT_TASK_UPDATE: &str = "worker.task.update";

/// Worker → orchestrator: periodic load report.
pub const EVENT_STATS: &str = "worker.stats";

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Job description carried by a task request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub task_id: TaskId,
    #[serde(default)]
    pub payload: TaskPayload,
}

impl TaskRequest {
    /// Reject requests that cannot be answered (no task id to address).
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.task_id.trim().is_empty() {
            return Err(CoreError::Validation(
                "taskId must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillRequest {
    pub task_id: TaskId,
}

/// Events the orchestrator pushes to the worker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundMessage {
    #[serde(rename = "worker.task.request")]
    TaskRequest(TaskRequest),

    #[serde(rename = "worker.task.kill")]
    TaskKill(KillRequest),
}

/// Parse a text frame received from the orchestrator.
pub fn parse_inbound(text: &str) -> Result<InboundMessage, CoreError> {
    serde_json::from_str(text).map_err(|e| CoreError::MalformedMessage(e.to_string()))
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Received,
    InProgress,
    Done,
}

/// A single status transition for one task.
///
/// `result`, `exitCode` and `error` only appear on `done` updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskUpdate {
    fn bare(task_id: &str, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.to_string(),
            status,
            result: None,
            exit_code: None,
            error: None,
        }
    }

    pub fn received(task_id: &str) -> Self {
        Self::bare(task_id, TaskStatus::Received)
    }

    pub fn in_progress(task_id: &str) -> Self {
        Self::bare(task_id, TaskStatus::InProgress)
    }

    /// Terminal update for a process that ran and exited.
    pub fn exited(task_id: &str, exit_code: Option<i32>) -> Self {
        Self {
            result: Some(exit_code == Some(0)),
            exit_code,
            ..Self::bare(task_id, TaskStatus::Done)
        }
    }

    /// Terminal update for a process that could not be run.
    pub fn failed(task_id: &str, error: impl Into<String>) -> Self {
        Self {
            result: Some(false),
            error: Some(error.into()),
            ..Self::bare(task_id, TaskStatus::Done)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status == TaskStatus::Done
    }
}

/// Periodic load report used by the orchestrator for placement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    /// CPU utilisation percent, or the uncalibrated sentinel.
    pub cpu: f64,
    /// Number of tasks currently registered on this worker.
    pub tasks: usize,
    /// Static throughput score measured at startup.
    pub ops: u64,
}

/// Events the worker sends to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundMessage {
    #[serde(rename = "worker.announce")]
    Announce(WorkerIdentity),

    #[serde(rename = "worker.task.update")]
    TaskUpdate(TaskUpdate),

    #[serde(rename = "worker.stats")]
    Stats(StatsReport),
}

impl OutboundMessage {
    /// Wire name of this event.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Announce(_) => EVENT_ANNOUNCE,
            Self::TaskUpdate(_) => EVENT_TASK_UPDATE,
            Self::Stats(_) => EVENT_STATS,
        }
    }

    /// Serialize into a text frame.
    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::MalformedMessage(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
