//! Client-facing wrapper over the action queue.

use std::sync::Arc;

use tokio::task::JoinHandle;

use actionq_core::{KickUserContext, SaveUserConfigContext, SendMessageContext, TaskId};
use actionq_events::NotificationSink;
use actionq_queue::{ActionQueue, DrainReport, QueueConfig, QueueError, TaskStore};

use crate::connectivity::ConnectivityMonitor;
use crate::handlers::{Services, client_registry};
use crate::sqlite_store::SqliteTaskStore;

/// Enqueues user actions under their natural ordering keys and keeps the
/// queue draining across reconnects.
pub struct ActionClient {
    queue: ActionQueue,
    connectivity: ConnectivityMonitor,
    watcher: Option<JoinHandle<()>>,
}

impl ActionClient {
    /// Wire handlers to `services`, run the startup drain and begin watching
    /// connectivity.
    pub async fn start(
        store: Arc<dyn TaskStore>,
        services: Services,
        sink: Arc<dyn NotificationSink>,
        config: QueueConfig,
        connectivity: ConnectivityMonitor,
    ) -> Result<Self, QueueError> {
        let registry = client_registry(&services, Some(connectivity.clone()));
        let queue = ActionQueue::new(store, registry, sink, config)?;

        let report = queue.start().await?;
        tracing::info!(
            recovered = report.recovered,
            dispatched = report.dispatched,
            "startup drain finished"
        );

        let watcher = connectivity.spawn(queue.clone());
        Ok(Self {
            queue,
            connectivity,
            watcher: Some(watcher),
        })
    }

    /// [`start`](Self::start) on the default SQLite database with
    /// configuration from the environment.
    pub async fn open_default(
        services: Services,
        sink: Arc<dyn NotificationSink>,
        connectivity: ConnectivityMonitor,
    ) -> anyhow::Result<Self> {
        let store = SqliteTaskStore::open_default().await?;
        let client = Self::start(
            Arc::new(store),
            services,
            sink,
            QueueConfig::from_env(),
            connectivity,
        )
        .await?;
        Ok(client)
    }

    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub async fn send_message(&self, ctx: SendMessageContext) -> Result<TaskId, QueueError> {
        let key = ctx.ordering_key();
        self.queue.enqueue(ctx, key).await
    }

    pub async fn save_user_config(&self, ctx: SaveUserConfigContext) -> Result<TaskId, QueueError> {
        let key = ctx.ordering_key();
        self.queue.enqueue(ctx, key).await
    }

    pub async fn kick_user(&self, ctx: KickUserContext) -> Result<TaskId, QueueError> {
        let key = ctx.ordering_key();
        self.queue.enqueue(ctx, key).await
    }

    pub async fn drain(&self) -> Result<DrainReport, QueueError> {
        self.queue.drain().await
    }

    /// Stop the connectivity watcher and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.connectivity.shutdown();
        if let Some(watcher) = self.watcher.take() {
            if let Err(e) = watcher.await {
                tracing::error!(error = %e, "connectivity watcher panicked");
            }
        }
    }
}

impl Drop for ActionClient {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}
