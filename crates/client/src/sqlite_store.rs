//! Durable task store persisted in SQLite.
//!
//! Tasks live in a single `tasks` table. Ids come from `AUTOINCREMENT`, so
//! they only ever grow and are never handed out twice, even after deletes.
//! File databases run in WAL mode with `synchronous = FULL`: once `add_task`
//! returns, the row survives a crash.
//!
//! A row that no longer decodes (a task type written by a newer build,
//! hand-edited JSON) must not wedge the queue. Status listings skip it, and a
//! live row is quarantined as `failed` with the decode error, so the healthy
//! tasks behind it keep draining.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqliteConnection, SqlitePool};

use actionq_core::{NewTask, StoreError, StoreResult, Task, TaskContext, TaskId, TaskStatus};
use actionq_queue::TaskStore;

pub const ENV_DB_PATH: &str = "ACTIONQ_DB_PATH";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        task_type     TEXT NOT NULL,
        context       TEXT NOT NULL,
        task_key      TEXT NOT NULL,
        status        TEXT NOT NULL,
        retry_count   INTEGER NOT NULL DEFAULT 0,
        created_at    TEXT NOT NULL,
        processed_at  TEXT NULL,
        error         TEXT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status, created_at)",
];

/// SQLite-backed [`TaskStore`].
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn connect(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create task queue directory at {parent:?}"))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open task queue database at {path:?}"))?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(path = %path.display(), "task store opened");
        Ok(store)
    }

    /// Private in-memory database, for tests.
    ///
    /// Pinned to one connection that is never recycled, since every SQLite
    /// connection to `:memory:` gets its own database.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("invalid in-memory SQLite url")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("failed to open in-memory task queue database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open the database at `ACTIONQ_DB_PATH`, or the per-user default
    /// location.
    pub async fn open_default() -> anyhow::Result<Self> {
        let path = match std::env::var_os(ENV_DB_PATH) {
            Some(p) if !p.is_empty() => PathBuf::from(p),
            _ => default_db_path()?,
        };
        Self::connect(path).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        for stmt in SCHEMA {
            sqlx::query(*stmt)
                .execute(&self.pool)
                .await
                .context("failed to create tasks schema")?;
        }
        Ok(())
    }

    async fn insert(&self, task: &NewTask) -> anyhow::Result<TaskId> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("failed to acquire connection")?;
        insert_row(&mut conn, task).await
    }

    /// Delete failed task `id` and insert `task` in one transaction.
    async fn swap_failed(&self, id: TaskId, task: &NewTask) -> anyhow::Result<Option<TaskId>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin requeue transaction")?;

        let removed = sqlx::query("DELETE FROM tasks WHERE id = ?1 AND status = ?2")
            .bind(id.get())
            .bind(TaskStatus::Failed.as_str())
            .execute(&mut *tx)
            .await
            .context("failed to remove failed task")?
            .rows_affected();
        if removed == 0 {
            tx.rollback().await.context("failed to roll back requeue")?;
            return Ok(None);
        }

        let new_id = insert_row(&mut tx, task).await?;
        tx.commit().await.context("failed to commit requeue")?;
        Ok(Some(new_id))
    }

    async fn fetch_one(&self, id: TaskId) -> anyhow::Result<Option<Task>> {
        let row = sqlx::query(
            r#"
            SELECT id, context, task_key, status, retry_count, created_at, processed_at, error
            FROM tasks
            WHERE id = ?1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .context("failed to load task")?;

        row.map(row_to_task).transpose()
    }

    async fn fetch_by_status(&self, status: TaskStatus) -> anyhow::Result<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            SELECT id, context, task_key, status, retry_count, created_at, processed_at, error
            FROM tasks
            WHERE status = ?1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to list {status} tasks"))?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id").context("task row without id")?;
            match row_to_task(row) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    let reason = format!("{e:#}");
                    tracing::warn!(task_id = id, status = %status, error = %reason, "skipping unreadable task row");
                    if status != TaskStatus::Failed {
                        self.quarantine(TaskId::new(id), &reason).await?;
                    }
                }
            }
        }
        Ok(tasks)
    }

    /// Park an undecodable row as `failed` so it stops blocking drains.
    async fn quarantine(&self, id: TaskId, reason: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE tasks SET status = ?2, error = ?3 WHERE id = ?1")
            .bind(id.get())
            .bind(TaskStatus::Failed.as_str())
            .bind(format!("unreadable task: {reason}"))
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to quarantine task {id}"))?;
        Ok(())
    }

    async fn write(&self, task: &Task) -> anyhow::Result<u64> {
        let context = serde_json::to_string(&task.context)?;
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET task_type = ?2,
                context = ?3,
                task_key = ?4,
                status = ?5,
                retry_count = ?6,
                processed_at = ?7,
                error = ?8
            WHERE id = ?1
            "#,
        )
        .bind(task.id.get())
        .bind(task.task_type().as_str())
        .bind(context)
        .bind(&task.key)
        .bind(task.status.as_str())
        .bind(i64::from(task.retry_count))
        .bind(task.processed_at.as_ref().map(timestamp))
        .bind(task.error.as_deref())
        .execute(&self.pool)
        .await
        .context("failed to update task")?;

        Ok(result.rows_affected())
    }

    async fn remove(&self, id: TaskId) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?1")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .context("failed to delete task")?;
        Ok(result.rows_affected())
    }

    async fn reset_processing(&self) -> anyhow::Result<u64> {
        let result = sqlx::query("UPDATE tasks SET status = ?1 WHERE status = ?2")
            .bind(TaskStatus::Pending.as_str())
            .bind(TaskStatus::Processing.as_str())
            .execute(&self.pool)
            .await
            .context("failed to reset processing tasks")?;
        Ok(result.rows_affected())
    }

    async fn count(&self, status: TaskStatus) -> anyhow::Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tasks WHERE status = ?1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .context("failed to count tasks")
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn add_task(&self, task: NewTask) -> StoreResult<TaskId> {
        self.insert(&task).await.map_err(into_store_error)
    }

    async fn get_task(&self, id: TaskId) -> StoreResult<Option<Task>> {
        self.fetch_one(id).await.map_err(into_store_error)
    }

    async fn get_pending_tasks(&self) -> StoreResult<Vec<Task>> {
        self.fetch_by_status(TaskStatus::Pending)
            .await
            .map_err(into_store_error)
    }

    async fn update_task(&self, task: &Task) -> StoreResult<()> {
        match self.write(task).await.map_err(into_store_error)? {
            0 => Err(StoreError::NotFound(task.id)),
            _ => Ok(()),
        }
    }

    async fn delete_task(&self, id: TaskId) -> StoreResult<()> {
        match self.remove(id).await.map_err(into_store_error)? {
            0 => Err(StoreError::NotFound(id)),
            _ => Ok(()),
        }
    }

    async fn requeue_failed(&self, id: TaskId, task: NewTask) -> StoreResult<Option<TaskId>> {
        self.swap_failed(id, &task).await.map_err(into_store_error)
    }

    async fn reset_processing_to_pending(&self) -> StoreResult<usize> {
        let reset = self.reset_processing().await.map_err(into_store_error)?;
        Ok(reset as usize)
    }

    async fn get_tasks_by_status(&self, status: TaskStatus) -> StoreResult<Vec<Task>> {
        self.fetch_by_status(status).await.map_err(into_store_error)
    }

    async fn count_by_status(&self, status: TaskStatus) -> StoreResult<usize> {
        let n = self.count(status).await.map_err(into_store_error)?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

async fn insert_row(conn: &mut SqliteConnection, task: &NewTask) -> anyhow::Result<TaskId> {
    let context = serde_json::to_string(&task.context)?;
    let result = sqlx::query(
        r#"
        INSERT INTO tasks (task_type, context, task_key, status, retry_count, created_at)
        VALUES (?1, ?2, ?3, ?4, 0, ?5)
        "#,
    )
    .bind(task.task_type().as_str())
    .bind(context)
    .bind(&task.key)
    .bind(TaskStatus::Pending.as_str())
    .bind(timestamp(&task.created_at))
    .execute(&mut *conn)
    .await
    .context("failed to insert task")?;

    Ok(TaskId::new(result.last_insert_rowid()))
}

fn into_store_error(err: anyhow::Error) -> StoreError {
    if err.downcast_ref::<serde_json::Error>().is_some() {
        StoreError::Serialization(format!("{err:#}"))
    } else {
        StoreError::Storage(format!("{err:#}"))
    }
}

/// Fixed-width UTC timestamps so text order matches time order.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str, column: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid {column} in tasks"))
}

/// Map a database row into a `Task`.
fn row_to_task(row: SqliteRow) -> anyhow::Result<Task> {
    let id: i64 = row.try_get("id")?;

    let context_str: String = row.try_get("context")?;
    let context: TaskContext = serde_json::from_str(&context_str)
        .with_context(|| format!("invalid context JSON for task {id}"))?;

    let key: String = row.try_get("task_key")?;

    let status_str: String = row.try_get("status")?;
    let status = status_str
        .parse::<TaskStatus>()
        .map_err(|e| anyhow::anyhow!("{e} (task {id})"))?;

    let retry_count: i64 = row.try_get("retry_count")?;
    let retry_count = u32::try_from(retry_count).context("retry_count out of range")?;

    let created_at_str: String = row.try_get("created_at")?;
    let created_at = parse_timestamp(&created_at_str, "created_at")?;

    let processed_at_str: Option<String> = row.try_get("processed_at")?;
    let processed_at = processed_at_str
        .as_deref()
        .map(|s| parse_timestamp(s, "processed_at"))
        .transpose()?;

    let error: Option<String> = row.try_get("error")?;

    Ok(Task {
        id: TaskId::new(id),
        context,
        key,
        status,
        retry_count,
        created_at,
        processed_at,
        error,
    })
}

/// Default database location: `{data_dir}/actionq/queue.db`.
pub fn default_db_path() -> anyhow::Result<PathBuf> {
    let mut dir = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;

    dir.push("actionq");
    dir.push("queue.db");
    Ok(dir)
}
