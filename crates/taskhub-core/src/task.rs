use crate::Priority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned task identifier.
pub type TaskId = i64;

/// Opaque authenticated user identifier supplied by the identity layer.
pub type UserId = i64;

/// Task lifecycle status.
///
/// ```text
/// pending --(enqueue succeeds)--> queued
/// queued  --(worker claims)-----> processing
/// processing --(success)--------> completed   [terminal]
/// processing --(failure)--------> failed      [terminal]
/// pending|queued --(user cancel)-> cancelled  [terminal]
/// ```
///
/// Transitions are monotonic: a task never returns to an earlier state, and
/// terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "queued" => Some(TaskStatus::Queued),
            "processing" => Some(TaskStatus::Processing),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether a user-requested cancel is legal from this state.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Queued)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one unit of submitted work.
///
/// Rows are mutated only by the lifecycle manager and never deleted;
/// cancellation and failure are terminal statuses, not row removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Store-assigned identifier.
    pub id: TaskId,

    /// Owning user.
    pub user_id: UserId,

    /// Free-text name.
    pub name: String,

    /// Worker routing key (e.g. "email", "report").
    #[serde(rename = "type")]
    pub task_type: String,

    pub priority: Priority,

    pub status: TaskStatus,

    /// Opaque payload, carried through to the worker untouched.
    pub payload: serde_json::Value,

    /// Result blob, set on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Error text, set on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Transport-assigned correlation key, set once the task is queued.
    /// Unset exactly while the task is still `pending`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// Identifier of the worker that claimed the task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by a submission request; everything else is assigned by
/// the store and the lifecycle manager.
#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub name: String,
    pub task_type: String,
    pub priority: Priority,
    pub payload: serde_json::Value,
}
