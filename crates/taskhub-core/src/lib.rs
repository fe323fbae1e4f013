mod error;
mod event;
mod priority;
mod task;

pub use error::{Error, Result};
pub use event::{EventKind, LifecycleEvent};
pub use priority::Priority;
pub use task::{Task, TaskDraft, TaskId, TaskStatus, UserId};
