use async_trait::async_trait;
use serde::Serialize;
use taskhub_core::{Priority, Result, Task, TaskId, TaskStatus, UserId};

/// Row contents for a new submission; the store assigns id and timestamps
/// and sets the status to `pending`.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub user_id: UserId,
    pub name: String,
    pub task_type: String,
    pub priority: Priority,
    pub payload: serde_json::Value,
}

/// Filtering options for listing a user's tasks.
#[derive(Debug, Clone)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
    pub priority: Option<Priority>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for TaskFilter {
    fn default() -> Self {
        TaskFilter {
            status: None,
            task_type: None,
            priority: None,
            limit: 50,
            offset: 0,
        }
    }
}

/// Per-status task counts for one user.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub pending: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Outcome of an owner-checked cancel.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// Row was `pending` or `queued` and is now `cancelled`.
    Cancelled(Task),
    /// No row with that id owned by the requester.
    NotFound,
    /// Row exists but its status does not permit cancellation.
    NotCancellable(TaskStatus),
}

/// Abstract contract over the relational store of record.
///
/// Every conditioned operation (`mark_queued`, `claim`, `complete`, `fail`,
/// `cancel`) must be a single atomic read-then-write, so that two claimants
/// racing the same message identifier can never both apply a transition.
/// Status changes flow exclusively through the lifecycle manager.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new `pending` row and return it with assigned id/timestamps.
    async fn insert(&self, new: NewTask) -> Result<Task>;

    /// Fetch a task by id, scoped to its owner.
    async fn get(&self, id: TaskId, owner: UserId) -> Result<Option<Task>>;

    /// List a user's tasks, newest first.
    async fn list(&self, owner: UserId, filter: TaskFilter) -> Result<Vec<Task>>;

    /// Record the transport message id and flip `pending` -> `queued`.
    /// Returns `None` without touching the row when it is no longer pending
    /// (e.g. cancelled while the enqueue was in flight).
    async fn mark_queued(&self, id: TaskId, message_id: &str) -> Result<Option<Task>>;

    /// Flip the unique `queued` row holding `message_id` to `processing`,
    /// recording the worker id and start time. `None` when no such row
    /// exists; duplicate or late claims are not an error.
    async fn claim(&self, message_id: &str, worker_id: &str) -> Result<Option<Task>>;

    /// Flip `processing` -> `completed` for the row holding `message_id`,
    /// recording the result and completion time. `None` on duplicate or
    /// late reports; an already-recorded result is never overwritten.
    async fn complete(
        &self,
        message_id: &str,
        result: serde_json::Value,
    ) -> Result<Option<Task>>;

    /// Flip `processing` -> `failed`, recording the error text.
    async fn fail(&self, message_id: &str, error: &str) -> Result<Option<Task>>;

    /// Owner-checked cancel, legal only from `pending` or `queued`.
    async fn cancel(&self, id: TaskId, owner: UserId) -> Result<CancelOutcome>;

    /// Per-status counts for one user.
    async fn stats(&self, owner: UserId) -> Result<TaskStats>;

    /// Liveness probe for health reporting.
    async fn ping(&self) -> Result<()>;
}
