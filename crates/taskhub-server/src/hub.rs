use crate::Metrics;
use std::collections::HashMap;
use std::sync::Arc;
use taskhub_core::{LifecycleEvent, UserId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

/// Opaque per-connection handle.
pub type SessionId = Uuid;

/// One connected notification client, bound to one owning user for its whole
/// lifetime. The hub holds the sending half of the outbound buffer; the
/// connection's writer loop drains the receiving half and terminates when the
/// buffer closes.
pub struct Session {
    id: SessionId,
    user_id: UserId,
    sender: mpsc::Sender<String>,
}

impl Session {
    /// Create a session with a bounded outbound buffer, returning the session
    /// (to register with the hub) and the receiver (for the writer loop).
    pub fn channel(user_id: UserId, capacity: usize) -> (Session, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Session {
                id: Uuid::new_v4(),
                user_id,
                sender,
            },
            receiver,
        )
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

enum Command {
    Register(Session),
    Unregister(SessionId),
    Broadcast { user_id: UserId, payload: String },
}

/// Concurrent registry of notification sessions.
///
/// All membership mutations, including per-owner broadcast, are serialized
/// through one command channel consumed by a single loop, so register,
/// unregister and broadcast can never interleave against the session set.
/// Broadcast never blocks on a slow client: a session whose buffer is full
/// is force-unregistered instead of stalling delivery to the others.
pub struct NotificationHub {
    commands: mpsc::UnboundedReceiver<Command>,
    sessions: HashMap<SessionId, Session>,
    metrics: Arc<Metrics>,
}

/// Cloneable handle for submitting hub operations.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl NotificationHub {
    pub fn new(metrics: Arc<Metrics>) -> (NotificationHub, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            NotificationHub {
                commands: rx,
                sessions: HashMap::new(),
                metrics,
            },
            HubHandle { commands: tx },
        )
    }

    /// Process commands until every handle is dropped. Runs for the lifetime
    /// of the process.
    pub async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            self.apply(command);
        }
        debug!("notification hub stopped");
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Register(session) => {
                debug!(session = %session.id, user = session.user_id, "session registered");
                self.sessions.insert(session.id, session);
            }
            Command::Unregister(id) => {
                // Removing the session drops the only sender, which closes
                // the outbound buffer and terminates the writer loop. A
                // second unregister finds nothing and is a no-op.
                if self.sessions.remove(&id).is_some() {
                    debug!(session = %id, "session unregistered");
                }
            }
            Command::Broadcast { user_id, payload } => {
                let mut stale = Vec::new();
                for session in self.sessions.values().filter(|s| s.user_id == user_id) {
                    match session.sender.try_send(payload.clone()) {
                        Ok(()) => self.metrics.notifications_sent.inc(),
                        Err(TrySendError::Full(_)) => {
                            warn!(session = %session.id, "outbound buffer full, dropping session");
                            self.metrics.notifications_dropped.inc();
                            stale.push(session.id);
                        }
                        Err(TrySendError::Closed(_)) => stale.push(session.id),
                    }
                }
                for id in stale {
                    self.sessions.remove(&id);
                }
            }
        }
        self.metrics
            .sessions_connected
            .set(self.sessions.len() as i64);
    }
}

impl HubHandle {
    pub fn register(&self, session: Session) {
        let _ = self.commands.send(Command::Register(session));
    }

    pub fn unregister(&self, id: SessionId) {
        let _ = self.commands.send(Command::Unregister(id));
    }

    /// Queue a lifecycle event for fan-out to the owner's sessions. Returns
    /// false when the hub loop is gone; callers treat delivery as
    /// best-effort either way.
    pub fn broadcast(&self, event: &LifecycleEvent) -> bool {
        self.commands
            .send(Command::Broadcast {
                user_id: event.owner_id,
                payload: event.to_wire().to_string(),
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    fn hub() -> (NotificationHub, HubHandle) {
        NotificationHub::new(Arc::new(Metrics::new().unwrap()))
    }

    fn broadcast(user_id: UserId, payload: &str) -> Command {
        Command::Broadcast {
            user_id,
            payload: payload.to_string(),
        }
    }

    #[test]
    fn fan_out_is_scoped_to_the_owner() {
        let (mut hub, _handle) = hub();

        let (s1, mut rx1) = Session::channel(1, 8);
        let (s2, mut rx2) = Session::channel(1, 8);
        let (s3, mut rx3) = Session::channel(2, 8);
        hub.apply(Command::Register(s1));
        hub.apply(Command::Register(s2));
        hub.apply(Command::Register(s3));

        hub.apply(broadcast(1, "ev"));

        assert_eq!(rx1.try_recv().unwrap(), "ev");
        assert_eq!(rx2.try_recv().unwrap(), "ev");
        assert_eq!(rx3.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn broadcast_with_no_sessions_is_a_noop() {
        let (mut hub, _handle) = hub();
        hub.apply(broadcast(1, "ev"));
    }

    #[test]
    fn saturated_session_is_force_unregistered() {
        let (mut hub, _handle) = hub();

        let (s1, mut rx1) = Session::channel(1, 1);
        let (s2, mut rx2) = Session::channel(1, 8);
        let s1_id = s1.id();
        hub.apply(Command::Register(s1));
        hub.apply(Command::Register(s2));

        hub.apply(broadcast(1, "first"));
        hub.apply(broadcast(1, "second"));

        // The healthy session got both events.
        assert_eq!(rx2.try_recv().unwrap(), "first");
        assert_eq!(rx2.try_recv().unwrap(), "second");

        // The slow session kept its buffered event, then its buffer closed.
        assert_eq!(rx1.try_recv().unwrap(), "first");
        assert_eq!(rx1.try_recv(), Err(TryRecvError::Disconnected));
        assert!(!hub.sessions.contains_key(&s1_id));

        // Later broadcasts still reach the surviving session.
        hub.apply(broadcast(1, "third"));
        assert_eq!(rx2.try_recv().unwrap(), "third");
    }

    #[test]
    fn unregister_closes_buffer_and_is_idempotent() {
        let (mut hub, _handle) = hub();

        let (session, mut rx) = Session::channel(1, 8);
        let id = session.id();
        hub.apply(Command::Register(session));
        hub.apply(Command::Unregister(id));

        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));

        // Double unregistration is safe.
        hub.apply(Command::Unregister(id));
        assert!(hub.sessions.is_empty());
    }

    #[test]
    fn per_session_fifo_order() {
        let (mut hub, _handle) = hub();
        let (session, mut rx) = Session::channel(1, 8);
        hub.apply(Command::Register(session));

        for payload in ["a", "b", "c"] {
            hub.apply(broadcast(1, payload));
        }
        assert_eq!(rx.try_recv().unwrap(), "a");
        assert_eq!(rx.try_recv().unwrap(), "b");
        assert_eq!(rx.try_recv().unwrap(), "c");
    }

    #[tokio::test]
    async fn handle_drives_the_running_hub() {
        let (hub, handle) = hub();
        tokio::spawn(hub.run());

        let (session, mut rx) = Session::channel(7, 8);
        handle.register(session);

        let event = LifecycleEvent::cancelled(3, 7);
        assert!(handle.broadcast(&event));

        let payload = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let wire: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(wire["type"], "task_cancelled");
        assert_eq!(wire["data"]["task_id"], 3);
    }
}
