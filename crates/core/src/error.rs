//! Error model shared by task stores and handlers.

use thiserror::Error;

use crate::context::TaskType;
use crate::id::TaskId;

/// Result type used by task store implementations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure of the persistence layer.
///
/// These are the only errors `enqueue` reports synchronously; everything that
/// happens after a task is persisted is handled by the retry state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No task row exists for the given id.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// An in-process lock was poisoned by a panicking writer.
    #[error("task store lock poisoned")]
    Poisoned,

    /// The backing engine rejected or failed the operation.
    #[error("storage error: {0}")]
    Storage(String),

    /// A persisted row could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

/// Failure reported by a task handler.
///
/// `Failed` is transient and counts against the attempt budget. `NoHandler`
/// is a configuration error and moves the task straight to `failed`.
/// `Deferred` means the handler declined to try at all (for example while
/// offline): the task goes back to `pending` without spending an attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("no handler registered for task type {0}")]
    NoHandler(TaskType),

    #[error("{0}")]
    Failed(String),

    #[error("deferred: {0}")]
    Deferred(String),
}

impl HandlerError {
    /// Build a transient failure from any displayable message.
    pub fn msg(msg: impl core::fmt::Display) -> Self {
        Self::Failed(msg.to_string())
    }

    /// Build a deferral that leaves the attempt budget untouched.
    pub fn deferred(reason: impl core::fmt::Display) -> Self {
        Self::Deferred(reason.to_string())
    }

    /// Only `Failed` consumes an attempt and may be retried. A missing
    /// handler will not appear on retry, so it fails immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Failed(_))
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, HandlerError::Deferred(_))
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(value: anyhow::Error) -> Self {
        // `{:#}` keeps the context chain on one line.
        Self::Failed(format!("{value:#}"))
    }
}
