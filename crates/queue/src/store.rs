//! Task storage abstraction and the in-memory implementation.
//!
//! The store is the only shared mutable state in the queue. The engine never
//! holds a task across a lock; it reads a snapshot, decides, and writes the
//! result back, so each store call has to be atomic on its own.
//!
//! ## Durability
//!
//! `add_task` returning is the caller's proof that the action will run
//! eventually: an implementation must not acknowledge a task it could lose
//! in a crash. [`InMemoryTaskStore`] is the exception and only fits tests and
//! ephemeral sessions.
//!
//! ## Recovery
//!
//! A process that dies mid-dispatch leaves rows in `processing`. Every drain
//! starts with [`TaskStore::reset_processing_to_pending`], so those rows are
//! dispatched again. Together with the gap between a handler succeeding and
//! `delete_task` landing, this makes delivery at-least-once: handlers must
//! tolerate running twice for the same task.
//!
//! ## Unreadable rows
//!
//! A durable store may hold rows it can no longer decode (for example a task
//! type from a newer build). Listings must not fail because of one such row;
//! skip it and, if it is live, park it as `failed`.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use actionq_core::{NewTask, StoreError, StoreResult, Task, TaskId, TaskStatus};

/// Durable CRUD for task records.
///
/// Every method is atomic with respect to concurrent callers. `add_task` must
/// not return until the task is durable: the returned id is the caller's
/// confirmation of persistence.
///
/// ## Ids
///
/// Ids are assigned by the store, grow monotonically and are never reused,
/// even after a delete. The engine breaks `created_at` ties by id.
///
/// ## Usage
///
/// ```ignore
/// let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
/// let id = store.add_task(NewTask::new(ctx, key)).await?;
/// assert!(store.get_task(id).await?.is_some());
/// ```
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new `pending` task and assign its id.
    async fn add_task(&self, task: NewTask) -> StoreResult<TaskId>;

    async fn get_task(&self, id: TaskId) -> StoreResult<Option<Task>>;

    /// All `pending` tasks, in no particular order.
    async fn get_pending_tasks(&self) -> StoreResult<Vec<Task>>;

    /// Overwrite the mutable fields of an existing task.
    async fn update_task(&self, task: &Task) -> StoreResult<()>;

    /// Remove a task (the terminal representation of `completed`).
    async fn delete_task(&self, id: TaskId) -> StoreResult<()>;

    /// Replace failed task `id` with `task` in one atomic step.
    ///
    /// Returns the new id, or `None` when `id` is missing or not `failed`
    /// (another caller got there first). Never leaves both rows behind.
    async fn requeue_failed(&self, id: TaskId, task: NewTask) -> StoreResult<Option<TaskId>>;

    /// Move every `processing` task back to `pending`.
    ///
    /// Idempotent. Returns how many tasks were reset.
    async fn reset_processing_to_pending(&self) -> StoreResult<usize>;

    /// Tasks with the given status, oldest first.
    async fn get_tasks_by_status(&self, status: TaskStatus) -> StoreResult<Vec<Task>>;

    async fn count_by_status(&self, status: TaskStatus) -> StoreResult<usize> {
        Ok(self.get_tasks_by_status(status).await?.len())
    }
}

#[async_trait]
impl<S> TaskStore for Arc<S>
where
    S: TaskStore + ?Sized,
{
    async fn add_task(&self, task: NewTask) -> StoreResult<TaskId> {
        (**self).add_task(task).await
    }

    async fn get_task(&self, id: TaskId) -> StoreResult<Option<Task>> {
        (**self).get_task(id).await
    }

    async fn get_pending_tasks(&self) -> StoreResult<Vec<Task>> {
        (**self).get_pending_tasks().await
    }

    async fn update_task(&self, task: &Task) -> StoreResult<()> {
        (**self).update_task(task).await
    }

    async fn delete_task(&self, id: TaskId) -> StoreResult<()> {
        (**self).delete_task(id).await
    }

    async fn requeue_failed(&self, id: TaskId, task: NewTask) -> StoreResult<Option<TaskId>> {
        (**self).requeue_failed(id, task).await
    }

    async fn reset_processing_to_pending(&self) -> StoreResult<usize> {
        (**self).reset_processing_to_pending().await
    }

    async fn get_tasks_by_status(&self, status: TaskStatus) -> StoreResult<Vec<Task>> {
        (**self).get_tasks_by_status(status).await
    }

    async fn count_by_status(&self, status: TaskStatus) -> StoreResult<usize> {
        (**self).count_by_status(status).await
    }
}

#[derive(Debug, Default)]
struct State {
    last_id: i64,
    tasks: BTreeMap<TaskId, Task>,
}

/// In-memory task store for tests/dev.
///
/// Not durable across restarts. Ids are monotonic and never reused.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    state: RwLock<State>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.tasks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn by_status(state: &State, status: TaskStatus) -> Vec<Task> {
        let mut tasks: Vec<_> = state
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.created_at, t.id));
        tasks
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn add_task(&self, task: NewTask) -> StoreResult<TaskId> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        state.last_id += 1;
        let id = TaskId::new(state.last_id);
        state.tasks.insert(id, task.into_task(id));
        Ok(id)
    }

    async fn get_task(&self, id: TaskId) -> StoreResult<Option<Task>> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.tasks.get(&id).cloned())
    }

    async fn get_pending_tasks(&self) -> StoreResult<Vec<Task>> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .cloned()
            .collect())
    }

    async fn update_task(&self, task: &Task) -> StoreResult<()> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        match state.tasks.get_mut(&task.id) {
            Some(existing) => {
                *existing = task.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(task.id)),
        }
    }

    async fn delete_task(&self, id: TaskId) -> StoreResult<()> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        state
            .tasks
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn requeue_failed(&self, id: TaskId, task: NewTask) -> StoreResult<Option<TaskId>> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        match state.tasks.get(&id) {
            Some(existing) if existing.status == TaskStatus::Failed => {}
            _ => return Ok(None),
        }
        state.tasks.remove(&id);
        state.last_id += 1;
        let new_id = TaskId::new(state.last_id);
        state.tasks.insert(new_id, task.into_task(new_id));
        Ok(Some(new_id))
    }

    async fn reset_processing_to_pending(&self) -> StoreResult<usize> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        let mut reset = 0;
        for task in state.tasks.values_mut() {
            if task.status == TaskStatus::Processing {
                task.status = TaskStatus::Pending;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn get_tasks_by_status(&self, status: TaskStatus) -> StoreResult<Vec<Task>> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(Self::by_status(&state, status))
    }

    async fn count_by_status(&self, status: TaskStatus) -> StoreResult<usize> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.tasks.values().filter(|t| t.status == status).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actionq_core::{SaveUserConfigContext, TaskContext};
    use chrono::Utc;
    use serde_json::json;

    fn new_task(user: &str) -> NewTask {
        let ctx = SaveUserConfigContext {
            user_address: user.into(),
            config: json!({}),
            keyset: json!(null),
        };
        let ctx = TaskContext::from(ctx);
        let key = ctx.ordering_key();
        NewTask::new(ctx, key)
    }

    #[tokio::test]
    async fn add_assigns_increasing_ids() {
        let store = InMemoryTaskStore::new();
        let a = store.add_task(new_task("a")).await.unwrap();
        let b = store.add_task(new_task("b")).await.unwrap();
        assert!(a < b);

        let read_back = store.get_task(a).await.unwrap().unwrap();
        assert_eq!(read_back.status, TaskStatus::Pending);
        assert_eq!(read_back.retry_count, 0);
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_delete() {
        let store = InMemoryTaskStore::new();
        let a = store.add_task(new_task("a")).await.unwrap();
        store.delete_task(a).await.unwrap();
        let b = store.add_task(new_task("b")).await.unwrap();
        assert!(b > a);
        assert_eq!(store.delete_task(a).await, Err(StoreError::NotFound(a)));
    }

    #[tokio::test]
    async fn update_unknown_task_is_not_found() {
        let store = InMemoryTaskStore::new();
        let id = store.add_task(new_task("a")).await.unwrap();
        let mut task = store.get_task(id).await.unwrap().unwrap();
        store.delete_task(id).await.unwrap();

        task.mark_processing(Utc::now());
        assert_eq!(store.update_task(&task).await, Err(StoreError::NotFound(id)));
    }

    #[tokio::test]
    async fn reset_processing_is_idempotent() {
        let store = InMemoryTaskStore::new();
        let id = store.add_task(new_task("a")).await.unwrap();
        let mut task = store.get_task(id).await.unwrap().unwrap();
        task.mark_processing(Utc::now());
        store.update_task(&task).await.unwrap();

        assert_eq!(store.count_by_status(TaskStatus::Processing).await.unwrap(), 1);
        assert_eq!(store.reset_processing_to_pending().await.unwrap(), 1);
        assert_eq!(store.reset_processing_to_pending().await.unwrap(), 0);
        assert_eq!(store.get_pending_tasks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn requeue_failed_only_swaps_failed_tasks() {
        let store = InMemoryTaskStore::new();
        let id = store.add_task(new_task("a")).await.unwrap();
        let task = store.get_task(id).await.unwrap().unwrap();

        assert_eq!(store.requeue_failed(id, task.to_retry()).await.unwrap(), None);
        assert_eq!(store.len(), 1);

        let mut failed = task.clone();
        failed.status = TaskStatus::Failed;
        store.update_task(&failed).await.unwrap();

        let new_id = store.requeue_failed(id, failed.to_retry()).await.unwrap().unwrap();
        assert!(new_id > id);
        assert_eq!(store.len(), 1);
        assert_eq!(store.requeue_failed(id, failed.to_retry()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn tasks_by_status_are_oldest_first() {
        let store = InMemoryTaskStore::new();
        let now = Utc::now();
        let late = store
            .add_task(new_task("late").with_created_at(now))
            .await
            .unwrap();
        let early = store
            .add_task(new_task("early").with_created_at(now - chrono::Duration::seconds(10)))
            .await
            .unwrap();

        let ids: Vec<_> = store
            .get_tasks_by_status(TaskStatus::Pending)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![early, late]);
    }
}
