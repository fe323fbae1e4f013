use crate::{CancelOutcome, NewTask, TaskFilter, TaskStats, TaskStore};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use taskhub_core::{Result, Task, TaskId, TaskStatus, UserId};

/// In-process store of record.
///
/// All operations run under a single lock, which gives the conditioned
/// read-then-write atomicity the `TaskStore` contract requires. Used by the
/// test suite and as the default wiring for a single-node deployment; a
/// relational adapter implements the same trait for anything durable.
#[derive(Default)]
pub struct MemoryTaskStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: TaskId,
    rows: BTreeMap<TaskId, Task>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, new: NewTask) -> Result<Task> {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let now = Utc::now();
        let task = Task {
            id: inner.next_id,
            user_id: new.user_id,
            name: new.name,
            task_type: new.task_type,
            priority: new.priority,
            status: TaskStatus::Pending,
            payload: new.payload,
            result: None,
            error: None,
            message_id: None,
            worker_id: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.rows.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get(&self, id: TaskId, owner: UserId) -> Result<Option<Task>> {
        let inner = self.inner.lock();
        Ok(inner
            .rows
            .get(&id)
            .filter(|t| t.user_id == owner)
            .cloned())
    }

    async fn list(&self, owner: UserId, filter: TaskFilter) -> Result<Vec<Task>> {
        let inner = self.inner.lock();
        let tasks = inner
            .rows
            .values()
            .rev() // ids ascend with creation time, so newest first
            .filter(|t| t.user_id == owner)
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| {
                filter
                    .task_type
                    .as_deref()
                    .map_or(true, |ty| t.task_type == ty)
            })
            .filter(|t| filter.priority.map_or(true, |p| t.priority == p))
            .skip(filter.offset)
            .take(filter.limit)
            .cloned()
            .collect();
        Ok(tasks)
    }

    async fn mark_queued(&self, id: TaskId, message_id: &str) -> Result<Option<Task>> {
        let mut inner = self.inner.lock();
        let Some(task) = inner.rows.get_mut(&id) else {
            return Ok(None);
        };
        if task.status != TaskStatus::Pending {
            return Ok(None);
        }
        task.status = TaskStatus::Queued;
        task.message_id = Some(message_id.to_string());
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn claim(&self, message_id: &str, worker_id: &str) -> Result<Option<Task>> {
        let mut inner = self.inner.lock();
        let task = inner.rows.values_mut().find(|t| {
            t.status == TaskStatus::Queued && t.message_id.as_deref() == Some(message_id)
        });
        let Some(task) = task else {
            return Ok(None);
        };
        let now = Utc::now();
        task.status = TaskStatus::Processing;
        task.worker_id = Some(worker_id.to_string());
        task.started_at = Some(now);
        task.updated_at = now;
        Ok(Some(task.clone()))
    }

    async fn complete(
        &self,
        message_id: &str,
        result: serde_json::Value,
    ) -> Result<Option<Task>> {
        let mut inner = self.inner.lock();
        let task = inner.rows.values_mut().find(|t| {
            t.status == TaskStatus::Processing && t.message_id.as_deref() == Some(message_id)
        });
        let Some(task) = task else {
            return Ok(None);
        };
        let now = Utc::now();
        task.status = TaskStatus::Completed;
        task.result = Some(result);
        task.completed_at = Some(now);
        task.updated_at = now;
        Ok(Some(task.clone()))
    }

    async fn fail(&self, message_id: &str, error: &str) -> Result<Option<Task>> {
        let mut inner = self.inner.lock();
        let task = inner.rows.values_mut().find(|t| {
            t.status == TaskStatus::Processing && t.message_id.as_deref() == Some(message_id)
        });
        let Some(task) = task else {
            return Ok(None);
        };
        let now = Utc::now();
        task.status = TaskStatus::Failed;
        task.error = Some(error.to_string());
        task.completed_at = Some(now);
        task.updated_at = now;
        Ok(Some(task.clone()))
    }

    async fn cancel(&self, id: TaskId, owner: UserId) -> Result<CancelOutcome> {
        let mut inner = self.inner.lock();
        let Some(task) = inner.rows.get_mut(&id).filter(|t| t.user_id == owner) else {
            return Ok(CancelOutcome::NotFound);
        };
        if !task.status.is_cancellable() {
            return Ok(CancelOutcome::NotCancellable(task.status));
        }
        let now = Utc::now();
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(now);
        task.updated_at = now;
        Ok(CancelOutcome::Cancelled(task.clone()))
    }

    async fn stats(&self, owner: UserId) -> Result<TaskStats> {
        let inner = self.inner.lock();
        let mut stats = TaskStats::default();
        for task in inner.rows.values().filter(|t| t.user_id == owner) {
            stats.total += 1;
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        Ok(stats)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
