use crate::{Task, TaskId, TaskStatus, UserId};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Kind of lifecycle event delivered to notification clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskCreated,
    TaskUpdated,
    TaskCancelled,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TaskCreated => "task_created",
            EventKind::TaskUpdated => "task_updated",
            EventKind::TaskCancelled => "task_cancelled",
        }
    }
}

/// One applied status transition, emitted by the lifecycle manager and fanned
/// out by the notification hub to the owning user's sessions.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub task_id: TaskId,
    pub owner_id: UserId,
    pub status: TaskStatus,
    /// Full task snapshot; absent for cancellations, where clients only need
    /// the task reference.
    pub snapshot: Option<Task>,
}

impl LifecycleEvent {
    pub fn created(task: &Task) -> Self {
        LifecycleEvent {
            kind: EventKind::TaskCreated,
            task_id: task.id,
            owner_id: task.user_id,
            status: task.status,
            snapshot: Some(task.clone()),
        }
    }

    pub fn updated(task: &Task) -> Self {
        LifecycleEvent {
            kind: EventKind::TaskUpdated,
            task_id: task.id,
            owner_id: task.user_id,
            status: task.status,
            snapshot: Some(task.clone()),
        }
    }

    pub fn cancelled(task_id: TaskId, owner_id: UserId) -> Self {
        LifecycleEvent {
            kind: EventKind::TaskCancelled,
            task_id,
            owner_id,
            status: TaskStatus::Cancelled,
            snapshot: None,
        }
    }

    /// Wire envelope pushed to clients: `{type, data}` where `data` is the
    /// task snapshot or a minimal `{task_id}` reference.
    pub fn to_wire(&self) -> serde_json::Value {
        let data = match &self.snapshot {
            Some(task) => json!(task),
            None => json!({ "task_id": self.task_id }),
        };
        json!({ "type": self.kind.as_str(), "data": data })
    }
}
