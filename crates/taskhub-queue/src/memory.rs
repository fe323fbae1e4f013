use crate::{QueueAttributes, QueueTransport, RawMessage};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use taskhub_core::Result;
use tokio::time::Instant;
use tracing::debug;

/// Poll granularity while long-polling an empty queue.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// In-process transport with the semantics the adapter is written against:
/// FIFO delivery, per-message enqueue delay, and at-least-once redelivery
/// after a visibility timeout. Used by the test suite and single-node runs;
/// a hosted queue service implements the same trait in production.
pub struct MemoryTransport {
    inner: Mutex<Inner>,
    visibility_timeout: Duration,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    ready: Vec<Stored>,
    in_flight: HashMap<String, InFlight>,
}

struct Stored {
    sequence: u64,
    message_id: String,
    body: String,
    attributes: HashMap<String, String>,
    visible_at: Instant,
}

struct InFlight {
    message: Stored,
    release_at: Instant,
}

impl MemoryTransport {
    pub fn new(visibility_timeout: Duration) -> Self {
        MemoryTransport {
            inner: Mutex::new(Inner::default()),
            visibility_timeout,
        }
    }

    /// Move expired in-flight messages back to the ready list.
    fn reap(inner: &mut Inner, now: Instant) {
        let expired: Vec<String> = inner
            .in_flight
            .iter()
            .filter(|(_, f)| f.release_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in expired {
            if let Some(in_flight) = inner.in_flight.remove(&receipt) {
                debug!(
                    message_id = %in_flight.message.message_id,
                    "visibility timeout elapsed, redelivering"
                );
                inner.ready.push(in_flight.message);
            }
        }
        inner.ready.sort_by_key(|m| m.sequence);
    }

    fn take_visible(&self, max_messages: usize, now: Instant) -> Vec<RawMessage> {
        let mut inner = self.inner.lock();
        Self::reap(&mut inner, now);

        let mut batch = Vec::new();
        let mut i = 0;
        while i < inner.ready.len() && batch.len() < max_messages {
            if inner.ready[i].visible_at <= now {
                let message = inner.ready.remove(i);
                let receipt = uuid::Uuid::new_v4().to_string();
                batch.push(RawMessage {
                    message_id: Some(message.message_id.clone()),
                    body: Some(message.body.clone()),
                    receipt: Some(receipt.clone()),
                    attributes: message.attributes.clone(),
                });
                inner.in_flight.insert(
                    receipt,
                    InFlight {
                        message,
                        release_at: now + self.visibility_timeout,
                    },
                );
            } else {
                i += 1;
            }
        }
        batch
    }
}

#[async_trait]
impl QueueTransport for MemoryTransport {
    async fn send(
        &self,
        body: String,
        attributes: HashMap<String, String>,
        delay_seconds: u32,
    ) -> Result<String> {
        let mut inner = self.inner.lock();
        inner.next_seq += 1;
        let message_id = uuid::Uuid::new_v4().to_string();
        let sequence = inner.next_seq;
        inner.ready.push(Stored {
            sequence,
            message_id: message_id.clone(),
            body,
            attributes,
            visible_at: Instant::now() + Duration::from_secs(u64::from(delay_seconds)),
        });
        Ok(message_id)
    }

    async fn receive(&self, max_messages: usize, wait_seconds: u32) -> Result<Vec<RawMessage>> {
        let deadline = Instant::now() + Duration::from_secs(u64::from(wait_seconds));
        loop {
            let now = Instant::now();
            let batch = self.take_visible(max_messages, now);
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn delete(&self, receipt: &str) -> Result<()> {
        // Idempotent: deleting an unknown or already-deleted receipt is fine.
        self.inner.lock().in_flight.remove(receipt);
        Ok(())
    }

    async fn attributes(&self) -> Result<QueueAttributes> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        Self::reap(&mut inner, now);
        let visible = inner.ready.iter().filter(|m| m.visible_at <= now).count();
        Ok(QueueAttributes {
            visible,
            in_flight: inner.in_flight.len(),
            delayed: inner.ready.len() - visible,
        })
    }
}
