use async_trait::async_trait;
use std::collections::HashMap;
use taskhub_core::Result;

/// One message as handed back by the transport. Fields are optional because
/// the transport contract does not guarantee them; `QueueAdapter::parse_envelope`
/// enforces presence.
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    pub message_id: Option<String>,
    pub body: Option<String>,
    pub receipt: Option<String>,
    pub attributes: HashMap<String, String>,
}

/// Approximate queue depth metrics, used for liveness reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueAttributes {
    /// Messages ready for delivery.
    pub visible: usize,
    /// Messages delivered but not yet deleted.
    pub in_flight: usize,
    /// Messages whose enqueue delay has not yet elapsed.
    pub delayed: usize,
}

/// Abstract contract over the external message transport.
///
/// Delivery is at-least-once: a received message stays invisible for the
/// transport's visibility timeout and is redelivered if not deleted in time,
/// so consumers must be idempotent with respect to duplicates. Ordering is
/// FIFO plus optional per-message delay; there is no priority primitive.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Send a message, returning the transport-assigned message identifier.
    async fn send(
        &self,
        body: String,
        attributes: HashMap<String, String>,
        delay_seconds: u32,
    ) -> Result<String>;

    /// Receive up to `max_messages`, long-polling up to `wait_seconds`.
    async fn receive(&self, max_messages: usize, wait_seconds: u32) -> Result<Vec<RawMessage>>;

    /// Delete a delivered message by its receipt handle. Idempotent.
    async fn delete(&self, receipt: &str) -> Result<()>;

    /// Lightweight metadata query.
    async fn attributes(&self) -> Result<QueueAttributes>;
}
