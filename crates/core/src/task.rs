//! The task record and its attempt state machine.
//!
//! ```text
//! pending --(dispatch)--> processing --(success)--> [deleted]
//! processing --(failure, attempts left)--> pending
//! processing --(failure, exhausted)--> failed
//! processing --(deferred)--> pending   (attempt not counted)
//! processing --(restart)--> pending
//! ```

use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::{TaskContext, TaskType};
use crate::error::HandlerError;
use crate::id::TaskId;

/// Persisted task status.
///
/// `Completed` exists for queries and reporting only; a completed task is
/// deleted from the store rather than kept as a row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl core::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// A task before the store has assigned it an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub context: TaskContext,
    pub key: String,
    pub created_at: DateTime<Utc>,
}

impl NewTask {
    pub fn new(context: TaskContext, key: impl Into<String>) -> Self {
        Self {
            context,
            key: key.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn task_type(&self) -> TaskType {
        self.context.task_type()
    }

    /// Materialise the row the store persists under `id`.
    pub fn into_task(self, id: TaskId) -> Task {
        Task {
            id,
            context: self.context,
            key: self.key,
            status: TaskStatus::Pending,
            retry_count: 0,
            created_at: self.created_at,
            processed_at: None,
            error: None,
        }
    }
}

/// A persisted unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub context: TaskContext,
    pub key: String,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Where a failed attempt left the task.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Back to `pending`, eligible on a later drain.
    Requeued,
    /// Terminal `failed`.
    Failed,
    /// Back to `pending` with `retry_count` and `error` untouched.
    Deferred,
}

impl Task {
    pub fn task_type(&self) -> TaskType {
        self.context.task_type()
    }

    /// Transition into `processing` right before dispatch.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Processing;
        self.processed_at = Some(now);
    }

    /// Apply a handler failure.
    ///
    /// Transient failures consume one attempt; the task fails terminally once
    /// `retry_count` reaches `max_attempts`. A missing handler fails the task
    /// immediately without touching `retry_count`. A deferral returns the
    /// task to `pending` as if it had never been dispatched. Only the latest
    /// error is kept.
    pub fn record_failure(&mut self, error: &HandlerError, max_attempts: u32) -> AttemptOutcome {
        if error.is_deferred() {
            self.status = TaskStatus::Pending;
            return AttemptOutcome::Deferred;
        }

        self.error = Some(error.to_string());

        if !error.is_retryable() {
            self.status = TaskStatus::Failed;
            return AttemptOutcome::Failed;
        }

        self.retry_count = self.retry_count.saturating_add(1);
        if self.retry_count >= max_attempts {
            self.status = TaskStatus::Failed;
            AttemptOutcome::Failed
        } else {
            self.status = TaskStatus::Pending;
            AttemptOutcome::Requeued
        }
    }

    /// Whether a pending task may be dispatched at `now`.
    ///
    /// Fresh tasks are always eligible. A task that already failed at least
    /// once waits until `min_delay` has passed since its last dispatch.
    pub fn is_eligible(&self, now: DateTime<Utc>, min_delay: Duration) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        if self.retry_count == 0 || min_delay.is_zero() {
            return true;
        }
        let Some(last) = self.processed_at else {
            return true;
        };
        let elapsed = now.signed_duration_since(last).to_std().unwrap_or(Duration::ZERO);
        elapsed >= min_delay
    }

    /// Reset a terminal task for a manual retry.
    ///
    /// The returned task keeps the original `created_at` so it re-enters its
    /// key group in its old position.
    pub fn to_retry(&self) -> NewTask {
        NewTask {
            context: self.context.clone(),
            key: self.key.clone(),
            created_at: self.created_at,
        }
    }
}
