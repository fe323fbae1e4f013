use crate::{QueueAttributes, QueueTransport, RawMessage};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use taskhub_core::{Error, Priority, Result};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Message attribute carrying the submission priority tier.
pub const PRIORITY_ATTRIBUTE: &str = "Priority";

/// Long-poll wait, bounding request amplification against the transport.
const RECEIVE_WAIT_SECONDS: u32 = 20;

/// Backoff bounds for transport outages in the consumer loop.
const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// A validated inbound message.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub message_id: String,
    pub body: String,
    pub receipt: String,
    /// Priority attribute, when present and recognized. Informational only
    /// on the consume side; delivery order is whatever the transport chose.
    pub priority: Option<Priority>,
}

/// Priority-queue abstraction over a FIFO/delay-only transport.
///
/// Priority is approximated by enqueue delay (high 0s, medium 10s, low 30s).
/// This is soft: once delays elapse, the transport delivers in its own FIFO
/// order, so a long-waiting low item may still beat a fresh high item.
#[derive(Clone)]
pub struct QueueAdapter {
    transport: Arc<dyn QueueTransport>,
    receive_wait_seconds: u32,
}

impl QueueAdapter {
    pub fn new(transport: Arc<dyn QueueTransport>) -> Self {
        QueueAdapter {
            transport,
            receive_wait_seconds: RECEIVE_WAIT_SECONDS,
        }
    }

    /// Override the long-poll wait (tests use 0).
    pub fn with_receive_wait(mut self, wait_seconds: u32) -> Self {
        self.receive_wait_seconds = wait_seconds;
        self
    }

    /// Send a payload with its priority tier mapped to an enqueue delay.
    /// Returns the transport-assigned message identifier.
    pub async fn enqueue(&self, body: String, priority: Priority) -> Result<String> {
        let attributes = HashMap::from([(
            PRIORITY_ATTRIBUTE.to_string(),
            priority.as_str().to_string(),
        )]);
        let message_id = self
            .transport
            .send(body, attributes, priority.delay_seconds())
            .await?;
        debug!(%message_id, %priority, "enqueued message");
        Ok(message_id)
    }

    /// Long-poll the transport. A `TransportUnavailable` error is retryable;
    /// callers back off and try again rather than treating it as fatal.
    pub async fn receive(&self, max_messages: usize) -> Result<Vec<RawMessage>> {
        self.transport
            .receive(max_messages, self.receive_wait_seconds)
            .await
    }

    /// Validate a raw message into an envelope. Body, message identifier and
    /// receipt are all required; anything less is `MalformedMessage` and
    /// should be dead-lettered by the caller, not retried indefinitely.
    pub fn parse_envelope(raw: RawMessage) -> Result<Envelope> {
        let message_id = raw
            .message_id
            .ok_or_else(|| Error::MalformedMessage("missing message id".to_string()))?;
        let body = raw
            .body
            .ok_or_else(|| Error::MalformedMessage(format!("message {message_id}: missing body")))?;
        let receipt = raw.receipt.ok_or_else(|| {
            Error::MalformedMessage(format!("message {message_id}: missing receipt"))
        })?;
        let priority = raw
            .attributes
            .get(PRIORITY_ATTRIBUTE)
            .and_then(|p| Priority::parse(p).ok());
        Ok(Envelope {
            message_id,
            body,
            receipt,
            priority,
        })
    }

    /// Delete a message from the transport. Idempotent; a failure here is
    /// recoverable because the visibility timeout will simply redeliver.
    pub async fn acknowledge(&self, receipt: &str) -> Result<()> {
        self.transport.delete(receipt).await
    }

    /// Lightweight metadata probe for liveness reporting.
    pub async fn health_check(&self) -> Result<QueueAttributes> {
        self.transport.attributes().await
    }

    /// Drive a claimant over the queue until `shutdown` fires.
    ///
    /// Receives in batches, validates each message, and hands envelopes to
    /// `handler`; a `true` return acknowledges the message, `false` leaves it
    /// for visibility-timeout redelivery. Malformed messages are acknowledged
    /// after logging so they cannot loop forever. Transport outages are
    /// retried with exponential backoff.
    pub async fn run_consumer<F, Fut>(&self, shutdown: Arc<Notify>, mut handler: F)
    where
        F: FnMut(Envelope) -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut backoff = BACKOFF_INITIAL;
        loop {
            let batch = tokio::select! {
                result = self.receive(10) => result,
                _ = shutdown.notified() => break,
            };

            let messages = match batch {
                Ok(messages) => {
                    backoff = BACKOFF_INITIAL;
                    messages
                }
                Err(e) => {
                    warn!("receive failed, backing off {:?}: {e}", backoff);
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.notified() => break,
                    }
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                    continue;
                }
            };

            for raw in messages {
                let receipt = raw.receipt.clone();
                match Self::parse_envelope(raw) {
                    Ok(envelope) => {
                        let receipt = envelope.receipt.clone();
                        if handler(envelope).await {
                            if let Err(e) = self.acknowledge(&receipt).await {
                                warn!("acknowledge failed, message will redeliver: {e}");
                            }
                        }
                    }
                    Err(e) => {
                        // Dead-letter path: drop the message instead of
                        // letting it redeliver forever.
                        warn!("dropping malformed message: {e}");
                        if let Some(receipt) = receipt {
                            if let Err(e) = self.acknowledge(&receipt).await {
                                warn!("acknowledge of malformed message failed: {e}");
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn adapter() -> (Arc<MemoryTransport>, QueueAdapter) {
        let transport = Arc::new(MemoryTransport::new(Duration::from_secs(30)));
        let adapter = QueueAdapter::new(transport.clone()).with_receive_wait(0);
        (transport, adapter)
    }

    #[tokio::test]
    async fn enqueue_maps_priority_to_delay() {
        let (transport, adapter) = adapter();

        adapter
            .enqueue("h".to_string(), Priority::High)
            .await
            .unwrap();
        adapter
            .enqueue("m".to_string(), Priority::Medium)
            .await
            .unwrap();
        adapter
            .enqueue("l".to_string(), Priority::Low)
            .await
            .unwrap();

        // Only the high message is visible immediately; medium and low are
        // held back by their delays.
        let attrs = transport.attributes().await.unwrap();
        assert_eq!(attrs.visible, 1);
        assert_eq!(attrs.delayed, 2);

        let batch = adapter.receive(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        let envelope = QueueAdapter::parse_envelope(batch.into_iter().next().unwrap()).unwrap();
        assert_eq!(envelope.body, "h");
        assert_eq!(envelope.priority, Some(Priority::High));
    }

    #[tokio::test]
    async fn receive_then_acknowledge_removes_message() {
        let (transport, adapter) = adapter();
        adapter
            .enqueue("job".to_string(), Priority::High)
            .await
            .unwrap();

        let batch = adapter.receive(10).await.unwrap();
        let envelope = QueueAdapter::parse_envelope(batch.into_iter().next().unwrap()).unwrap();

        // In flight until acknowledged.
        let attrs = transport.attributes().await.unwrap();
        assert_eq!(attrs.in_flight, 1);

        adapter.acknowledge(&envelope.receipt).await.unwrap();
        let attrs = transport.attributes().await.unwrap();
        assert_eq!(attrs, QueueAttributes::default());

        // Acknowledging again is a no-op.
        adapter.acknowledge(&envelope.receipt).await.unwrap();
    }

    #[test]
    fn parse_rejects_incomplete_messages() {
        let raw = RawMessage {
            message_id: Some("m-1".to_string()),
            body: None,
            receipt: Some("r-1".to_string()),
            attributes: HashMap::new(),
        };
        assert!(matches!(
            QueueAdapter::parse_envelope(raw),
            Err(Error::MalformedMessage(_))
        ));

        let raw = RawMessage {
            message_id: Some("m-1".to_string()),
            body: Some("{}".to_string()),
            receipt: None,
            attributes: HashMap::new(),
        };
        assert!(matches!(
            QueueAdapter::parse_envelope(raw),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn parse_tolerates_unknown_priority_attribute() {
        let raw = RawMessage {
            message_id: Some("m-1".to_string()),
            body: Some("{}".to_string()),
            receipt: Some("r-1".to_string()),
            attributes: HashMap::from([(PRIORITY_ATTRIBUTE.to_string(), "urgent".to_string())]),
        };
        let envelope = QueueAdapter::parse_envelope(raw).unwrap();
        assert_eq!(envelope.priority, None);
    }

    #[tokio::test]
    async fn consumer_acknowledges_handled_messages() {
        let (transport, adapter) = adapter();
        adapter
            .enqueue("one".to_string(), Priority::High)
            .await
            .unwrap();
        adapter
            .enqueue("two".to_string(), Priority::High)
            .await
            .unwrap();

        let shutdown = Arc::new(Notify::new());
        let seen = Arc::new(AtomicUsize::new(0));

        let consumer = {
            let adapter = adapter.clone();
            let shutdown = shutdown.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                let notify_after = shutdown.clone();
                adapter
                    .run_consumer(shutdown, move |_envelope| {
                        let seen = seen.clone();
                        let notify_after = notify_after.clone();
                        async move {
                            if seen.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                                // notify_one stores a permit, so the consumer
                                // observes it on its next select.
                                notify_after.notify_one();
                            }
                            true
                        }
                    })
                    .await;
            })
        };

        tokio::time::timeout(Duration::from_secs(5), consumer)
            .await
            .expect("consumer should stop after both messages")
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        let attrs = transport.attributes().await.unwrap();
        assert_eq!(attrs, QueueAttributes::default());
    }
}
