mod adapter;
mod memory;
mod transport;

pub use adapter::{Envelope, QueueAdapter, PRIORITY_ATTRIBUTE};
pub use memory::MemoryTransport;
pub use transport::{QueueAttributes, QueueTransport, RawMessage};
