//! Public entry point.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use actionq_core::{NewTask, StoreError, Task, TaskContext, TaskId, TaskStatus};
use actionq_events::{NotificationSink, QueueEvent};

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::executor::{DrainReport, QueueEngine};
use crate::handlers::HandlerRegistry;
use crate::store::TaskStore;

/// Task counts per live status (completed tasks are deleted, so not counted).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub processing: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.failed
    }
}

/// Durable action queue.
///
/// Cheap to clone; clones share the same engine and single-flight guard.
#[derive(Clone)]
pub struct ActionQueue {
    engine: Arc<QueueEngine>,
}

impl ActionQueue {
    pub fn new(
        store: Arc<dyn TaskStore>,
        handlers: HandlerRegistry,
        sink: Arc<dyn NotificationSink>,
        config: QueueConfig,
    ) -> Result<Self, QueueError> {
        let engine = QueueEngine::new(store, handlers, sink, config)?;
        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    pub fn engine(&self) -> &Arc<QueueEngine> {
        &self.engine
    }

    pub fn config(&self) -> &QueueConfig {
        self.engine.config()
    }

    fn store(&self) -> &Arc<dyn TaskStore> {
        self.engine.store()
    }

    /// Persist a task and kick off a drain without waiting for it.
    ///
    /// Returns once the task is durable. Only persistence failures are
    /// reported; the context is not validated here.
    pub async fn enqueue(
        &self,
        context: impl Into<TaskContext>,
        key: impl Into<String>,
    ) -> Result<TaskId, QueueError> {
        self.enqueue_task(NewTask::new(context.into(), key)).await
    }

    /// Like [`enqueue`](Self::enqueue) with a caller-built task, e.g. to set
    /// `created_at` explicitly.
    pub async fn enqueue_task(&self, task: NewTask) -> Result<TaskId, QueueError> {
        let task_type = task.task_type();
        let key = task.key.clone();

        let id = self.store().add_task(task).await?;
        info!(task_id = %id, task_type = %task_type, key = %key, "task enqueued");

        self.engine.notify(QueueEvent::QueueChanged);
        if self.engine.config().drain_on_enqueue {
            self.trigger_drain();
        }
        Ok(id)
    }

    /// Run a drain cycle and wait for it.
    pub async fn drain(&self) -> Result<DrainReport, QueueError> {
        self.engine.drain().await
    }

    /// Start a drain in the background.
    ///
    /// Outside a Tokio runtime this only logs a warning; the tasks stay
    /// pending for the next trigger.
    pub fn trigger_drain(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime; drain not started");
            return;
        };
        let engine = Arc::clone(&self.engine);
        handle.spawn(async move {
            if let Err(e) = engine.drain().await {
                error!(error = %e, "background drain failed");
            }
        });
    }

    /// Startup drain: recovers tasks a previous process left `processing`.
    pub async fn start(&self) -> Result<DrainReport, QueueError> {
        info!("action queue starting");
        self.drain().await
    }

    /// Hook for the caller's connectivity signal.
    pub fn on_connectivity_restored(&self) {
        debug!("connectivity restored; triggering drain");
        self.trigger_drain();
    }

    /// Re-enqueue a terminally failed task.
    ///
    /// The new task gets a fresh id and attempt budget but keeps the original
    /// `created_at`, so it runs ahead of anything queued on its key since.
    /// The swap is atomic: of two overlapping calls, one wins and the other
    /// gets `NotFound`.
    pub async fn retry_failed(&self, id: TaskId) -> Result<TaskId, QueueError> {
        let task = self
            .store()
            .get_task(id)
            .await?
            .ok_or(QueueError::Store(StoreError::NotFound(id)))?;

        if task.status != TaskStatus::Failed {
            return Err(QueueError::NotFailed {
                id,
                status: task.status,
            });
        }

        let Some(new_id) = self.store().requeue_failed(id, task.to_retry()).await? else {
            // Lost a race with another retry or discard.
            return Err(match self.store().get_task(id).await? {
                Some(current) => QueueError::NotFailed {
                    id,
                    status: current.status,
                },
                None => QueueError::Store(StoreError::NotFound(id)),
            });
        };
        info!(task_id = %id, new_task_id = %new_id, task_type = %task.task_type(), "failed task re-enqueued");

        self.engine.notify(QueueEvent::QueueChanged);
        if self.engine.config().drain_on_enqueue {
            self.trigger_drain();
        }
        Ok(new_id)
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>, QueueError> {
        Ok(self.store().get_task(id).await?)
    }

    pub async fn tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, QueueError> {
        Ok(self.store().get_tasks_by_status(status).await?)
    }

    pub async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let store = self.store();
        Ok(QueueCounts {
            pending: store.count_by_status(TaskStatus::Pending).await?,
            processing: store.count_by_status(TaskStatus::Processing).await?,
            failed: store.count_by_status(TaskStatus::Failed).await?,
        })
    }
}

impl core::fmt::Debug for ActionQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ActionQueue")
            .field("config", self.engine.config())
            .field("draining", &self.engine.is_draining())
            .finish()
    }
}
