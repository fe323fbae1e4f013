use crate::task::{TaskId, TaskStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The message transport could not be reached. Retryable with backoff.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A received message is missing its body, identifier or receipt.
    /// Not retryable for that message; callers should dead-letter it.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The requested status change is not legal from the task's current state.
    #[error("invalid transition: task {task_id} is {status}")]
    InvalidTransition { task_id: TaskId, status: TaskStatus },

    /// Task absent, or not owned by the requesting user.
    #[error("task not found")]
    NotFound,

    /// The store could not confirm the operation. Retryable at the caller's
    /// discretion; a transition is not applied until the store confirms it.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Priority string is not one of low/medium/high. Rejected at submission
    /// time rather than silently defaulted.
    #[error("invalid priority: {0:?}")]
    InvalidPriority(String),
}

pub type Result<T> = std::result::Result<T, Error>;
