use crate::{HubHandle, Metrics};
use serde_json::json;
use std::sync::Arc;
use taskhub_core::{Error, LifecycleEvent, Result, Task, TaskDraft, TaskId, UserId};
use taskhub_queue::QueueAdapter;
use taskhub_store::{CancelOutcome, NewTask, TaskStore};
use tracing::{debug, info, warn};

/// Owner of the task state machine.
///
/// The only place task status is allowed to change. Mediates between the
/// queue adapter and the store of record, and emits one lifecycle event to
/// the notification hub per applied transition. The store is authoritative:
/// a transition counts once persisted, and event emission is best-effort.
pub struct LifecycleManager {
    store: Arc<dyn TaskStore>,
    queue: QueueAdapter,
    hub: HubHandle,
    metrics: Arc<Metrics>,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: QueueAdapter,
        hub: HubHandle,
        metrics: Arc<Metrics>,
    ) -> Self {
        LifecycleManager {
            store,
            queue,
            hub,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn queue(&self) -> &QueueAdapter {
        &self.queue
    }

    /// Persist a new task and hand it to the queue.
    ///
    /// The row is inserted as `pending` before the enqueue, so a transport
    /// outage leaves it visible to the owner as retryable rather than lost;
    /// the error is propagated to the caller. On success the transport's
    /// message identifier is recorded and the row flips to `queued`.
    pub async fn submit(&self, owner: UserId, draft: TaskDraft) -> Result<Task> {
        let task = self
            .store
            .insert(NewTask {
                user_id: owner,
                name: draft.name,
                task_type: draft.task_type,
                priority: draft.priority,
                payload: draft.payload,
            })
            .await?;

        let body = json!({
            "task_id": task.id,
            "type": task.task_type,
            "payload": task.payload,
        })
        .to_string();

        let message_id = match self.queue.enqueue(body, task.priority).await {
            Ok(message_id) => message_id,
            Err(e) => {
                warn!(task_id = task.id, "enqueue failed, task left pending: {e}");
                return Err(e);
            }
        };

        match self.store.mark_queued(task.id, &message_id).await? {
            Some(queued) => {
                info!(task_id = queued.id, %message_id, "task queued");
                self.metrics
                    .inc_tasks_total(queued.status.as_str(), &queued.task_type);
                self.emit(LifecycleEvent::created(&queued));
                Ok(queued)
            }
            None => {
                // Cancelled while the enqueue was in flight. The message is
                // already on the transport; its eventual claim will no-op
                // against the terminal row.
                debug!(task_id = task.id, "task left pending state during enqueue");
                self.store
                    .get(task.id, owner)
                    .await?
                    .ok_or(Error::NotFound)
            }
        }
    }

    /// Apply a worker claim, keyed by the transport message identifier.
    /// Unknown, cancelled or already-claimed message ids are a no-op, not an
    /// error: at-least-once delivery makes duplicates normal.
    pub async fn mark_claimed(&self, message_id: &str, worker_id: &str) -> Result<Option<Task>> {
        match self.store.claim(message_id, worker_id).await? {
            Some(task) => {
                info!(task_id = task.id, worker_id, "task claimed");
                self.metrics
                    .inc_tasks_total(task.status.as_str(), &task.task_type);
                self.emit(LifecycleEvent::updated(&task));
                Ok(Some(task))
            }
            None => {
                debug!(%message_id, "claim for unknown or settled message, ignoring");
                Ok(None)
            }
        }
    }

    /// Record a success report. Idempotent: a second report for the same
    /// message identifier changes nothing and never overwrites the result.
    pub async fn mark_completed(
        &self,
        message_id: &str,
        result: serde_json::Value,
    ) -> Result<Option<Task>> {
        match self.store.complete(message_id, result).await? {
            Some(task) => {
                info!(task_id = task.id, "task completed");
                self.metrics
                    .inc_tasks_total(task.status.as_str(), &task.task_type);
                self.emit(LifecycleEvent::updated(&task));
                Ok(Some(task))
            }
            None => {
                debug!(%message_id, "completion for unknown or settled message, ignoring");
                Ok(None)
            }
        }
    }

    /// Record a failure report. Same idempotence rules as `mark_completed`.
    pub async fn mark_failed(&self, message_id: &str, error: &str) -> Result<Option<Task>> {
        match self.store.fail(message_id, error).await? {
            Some(task) => {
                info!(task_id = task.id, "task failed: {error}");
                self.metrics
                    .inc_tasks_total(task.status.as_str(), &task.task_type);
                self.emit(LifecycleEvent::updated(&task));
                Ok(Some(task))
            }
            None => {
                debug!(%message_id, "failure report for unknown or settled message, ignoring");
                Ok(None)
            }
        }
    }

    /// Owner-checked cancel, legal only from `pending` or `queued`.
    ///
    /// Cancelling a queued task does not retract its in-flight message; the
    /// eventual worker claim or report for that message identifier is
    /// ignored against the terminal row.
    pub async fn cancel(&self, id: TaskId, owner: UserId) -> Result<Task> {
        match self.store.cancel(id, owner).await? {
            CancelOutcome::Cancelled(task) => {
                info!(task_id = task.id, "task cancelled");
                self.metrics
                    .inc_tasks_total(task.status.as_str(), &task.task_type);
                self.emit(LifecycleEvent::cancelled(task.id, task.user_id));
                Ok(task)
            }
            CancelOutcome::NotFound => Err(Error::NotFound),
            CancelOutcome::NotCancellable(status) => Err(Error::InvalidTransition {
                task_id: id,
                status,
            }),
        }
    }

    /// Best-effort notification: a dropped event is logged, never rolled
    /// back into the persisted transition.
    fn emit(&self, event: LifecycleEvent) {
        if !self.hub.broadcast(&event) {
            warn!(
                task_id = event.task_id,
                "notification hub unavailable, event dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NotificationHub, Session};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;
    use taskhub_core::{Priority, TaskStatus};
    use taskhub_queue::{MemoryTransport, QueueAttributes, QueueTransport, RawMessage};
    use taskhub_store::MemoryTaskStore;
    use tokio::sync::mpsc;

    fn draft(priority: Priority) -> TaskDraft {
        TaskDraft {
            name: "send welcome email".to_string(),
            task_type: "email".to_string(),
            priority,
            payload: json!({"to": "user@example.com"}),
        }
    }

    fn manager_with(
        transport: Arc<dyn QueueTransport>,
    ) -> (LifecycleManager, Arc<MemoryTaskStore>, mpsc::Receiver<String>) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let store = Arc::new(MemoryTaskStore::new());
        let queue = QueueAdapter::new(transport).with_receive_wait(0);

        let (hub, handle) = NotificationHub::new(metrics.clone());
        tokio::spawn(hub.run());
        let (session, events) = Session::channel(1, 16);
        handle.register(session);

        let manager = LifecycleManager::new(store.clone(), queue, handle, metrics);
        (manager, store, events)
    }

    fn manager() -> (LifecycleManager, Arc<MemoryTaskStore>, mpsc::Receiver<String>) {
        manager_with(Arc::new(MemoryTransport::new(Duration::from_secs(30))))
    }

    async fn next_event(events: &mut mpsc::Receiver<String>) -> serde_json::Value {
        let payload = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("expected a notification")
            .expect("hub closed the session buffer");
        serde_json::from_str(&payload).unwrap()
    }

    /// Transport stub standing in for a connectivity outage.
    struct DownTransport;

    #[async_trait]
    impl QueueTransport for DownTransport {
        async fn send(
            &self,
            _body: String,
            _attributes: HashMap<String, String>,
            _delay_seconds: u32,
        ) -> taskhub_core::Result<String> {
            Err(Error::TransportUnavailable("connection refused".to_string()))
        }

        async fn receive(
            &self,
            _max_messages: usize,
            _wait_seconds: u32,
        ) -> taskhub_core::Result<Vec<RawMessage>> {
            Err(Error::TransportUnavailable("connection refused".to_string()))
        }

        async fn delete(&self, _receipt: &str) -> taskhub_core::Result<()> {
            Err(Error::TransportUnavailable("connection refused".to_string()))
        }

        async fn attributes(&self) -> taskhub_core::Result<QueueAttributes> {
            Err(Error::TransportUnavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn submit_queues_and_notifies() {
        let (manager, _store, mut events) = manager();

        let task = manager.submit(1, draft(Priority::High)).await.unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert!(task.message_id.is_some());

        let event = next_event(&mut events).await;
        assert_eq!(event["type"], "task_created");
        assert_eq!(event["data"]["status"], "queued");
    }

    #[tokio::test]
    async fn enqueue_failure_leaves_task_pending() {
        let (manager, store, _events) = manager_with(Arc::new(DownTransport));

        let err = manager.submit(1, draft(Priority::High)).await.unwrap_err();
        assert!(matches!(err, Error::TransportUnavailable(_)));

        // The row survived as pending without a message id: visible to the
        // owner and distinguishable from a queued task.
        let rows = store.list(1, Default::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, TaskStatus::Pending);
        assert!(rows[0].message_id.is_none());
    }

    #[tokio::test]
    async fn claim_and_complete_flow() {
        let (manager, _store, mut events) = manager();

        let task = manager.submit(1, draft(Priority::High)).await.unwrap();
        let message_id = task.message_id.clone().unwrap();

        let claimed = manager
            .mark_claimed(&message_id, "worker-7")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.status, TaskStatus::Processing);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-7"));

        let done = manager
            .mark_completed(&message_id, json!({"sent": true}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.completed_at.unwrap() >= done.started_at.unwrap());

        // created, claimed, completed: three events, in transition order.
        assert_eq!(next_event(&mut events).await["type"], "task_created");
        let claimed_ev = next_event(&mut events).await;
        assert_eq!(claimed_ev["data"]["status"], "processing");
        let done_ev = next_event(&mut events).await;
        assert_eq!(done_ev["data"]["status"], "completed");
        assert_eq!(done_ev["data"]["result"], json!({"sent": true}));
    }

    #[tokio::test]
    async fn duplicate_completion_is_a_noop() {
        let (manager, store, _events) = manager();

        let task = manager.submit(1, draft(Priority::High)).await.unwrap();
        let message_id = task.message_id.clone().unwrap();
        manager.mark_claimed(&message_id, "w1").await.unwrap();
        manager
            .mark_completed(&message_id, json!("first"))
            .await
            .unwrap();

        let second = manager
            .mark_completed(&message_id, json!("second"))
            .await
            .unwrap();
        assert!(second.is_none());

        let row = store.get(task.id, 1).await.unwrap().unwrap();
        assert_eq!(row.result, Some(json!("first")));
    }

    #[tokio::test]
    async fn claim_with_unknown_message_id_is_a_noop() {
        let (manager, _store, _events) = manager();
        let outcome = manager.mark_claimed("no-such-message", "w1").await.unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn cancel_then_late_claim_is_ignored() {
        let (manager, store, mut events) = manager();

        let task = manager.submit(1, draft(Priority::Low)).await.unwrap();
        let message_id = task.message_id.clone().unwrap();

        let cancelled = manager.cancel(task.id, 1).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);

        // The in-flight message is not retracted; the worker's eventual
        // claim and report land on a terminal row and change nothing.
        assert!(manager.mark_claimed(&message_id, "w1").await.unwrap().is_none());
        assert!(manager.mark_failed(&message_id, "late").await.unwrap().is_none());
        let row = store.get(task.id, 1).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Cancelled);

        assert_eq!(next_event(&mut events).await["type"], "task_created");
        let ev = next_event(&mut events).await;
        assert_eq!(ev["type"], "task_cancelled");
        assert_eq!(ev["data"], json!({"task_id": task.id}));
    }

    #[tokio::test]
    async fn cancel_guard_rejects_processing_and_foreign_tasks() {
        let (manager, _store, _events) = manager();

        let task = manager.submit(1, draft(Priority::High)).await.unwrap();
        let message_id = task.message_id.clone().unwrap();
        manager.mark_claimed(&message_id, "w1").await.unwrap();

        let err = manager.cancel(task.id, 1).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                status: TaskStatus::Processing,
                ..
            }
        ));

        // Another user's cancel looks like absence.
        let err = manager.cancel(task.id, 2).await.unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }
}
