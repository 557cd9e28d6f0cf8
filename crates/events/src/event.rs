//! Notification payloads.

use serde::{Deserialize, Serialize};

use actionq_core::{TaskId, TaskType};

/// Something observable happened in the queue.
///
/// `QueueChanged` carries nothing: consumers re-query counts by status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    QueueChanged,
    TaskSucceeded {
        task_id: TaskId,
        task_type: TaskType,
        message: String,
    },
    TaskFailed {
        task_id: TaskId,
        task_type: TaskType,
        message: String,
        error: String,
    },
}

impl QueueEvent {
    pub fn succeeded(task_id: TaskId, task_type: TaskType) -> Self {
        Self::TaskSucceeded {
            task_id,
            task_type,
            message: task_type.success_message().to_string(),
        }
    }

    pub fn failed(task_id: TaskId, task_type: TaskType, error: impl Into<String>) -> Self {
        Self::TaskFailed {
            task_id,
            task_type,
            message: task_type.failure_message().to_string(),
            error: error.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::QueueChanged => "queue_changed",
            QueueEvent::TaskSucceeded { .. } => "task_succeeded",
            QueueEvent::TaskFailed { .. } => "task_failed",
        }
    }
}
