//! Queue-level errors.

use actionq_core::{StoreError, TaskId, TaskStatus};
use thiserror::Error;

/// Errors surfaced synchronously by the queue.
///
/// Handler failures never appear here; they are absorbed by the retry state
/// machine and reported through notifications.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid queue configuration: {0}")]
    Config(String),

    /// Only terminally failed tasks can be retried by hand.
    #[error("task {id} is {status}, not failed")]
    NotFailed { id: TaskId, status: TaskStatus },
}
