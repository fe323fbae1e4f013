mod memory;
mod store;

pub use memory::MemoryTaskStore;
pub use store::{CancelOutcome, NewTask, TaskFilter, TaskStats, TaskStore};
