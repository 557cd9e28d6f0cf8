//! `actionq` - inspector for the local action queue database.

mod cli;

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;

use actionq_client::SqliteTaskStore;
use actionq_core::{StoreError, Task, TaskId, TaskStatus};
use actionq_events::TracingSink;
use actionq_queue::{ActionQueue, HandlerRegistry, QueueConfig, TaskStore, Unsupported};

use crate::cli::{Cli, Commands, OutputFormat, StatusArg};

#[derive(Debug, Serialize)]
struct TaskRow {
    id: TaskId,
    task_type: String,
    key: String,
    status: TaskStatus,
    retry_count: u32,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl From<Task> for TaskRow {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            task_type: task.task_type().to_string(),
            key: task.key,
            status: task.status,
            retry_count: task.retry_count,
            created_at: task.created_at,
            processed_at: task.processed_at,
            error: task.error,
        }
    }
}

impl From<StatusArg> for TaskStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => TaskStatus::Pending,
            StatusArg::Processing => TaskStatus::Processing,
            StatusArg::Failed => TaskStatus::Failed,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    actionq_observability::init();
    let cli = Cli::parse();

    let store = match &cli.db {
        Some(path) => SqliteTaskStore::connect(path).await?,
        None => SqliteTaskStore::open_default().await?,
    };
    let store = Arc::new(store);

    // This process never drains, so no handler is ever invoked.
    let queue = ActionQueue::new(
        store.clone(),
        HandlerRegistry::new(Unsupported, Unsupported, Unsupported),
        Arc::new(TracingSink),
        QueueConfig::default().with_drain_on_enqueue(false),
    )?;

    match cli.command {
        Commands::Status => {
            let counts = queue.counts().await?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&counts)?),
                OutputFormat::Table => {
                    println!("pending     {}", counts.pending);
                    println!("processing  {}", counts.processing);
                    println!("failed      {}", counts.failed);
                }
            }
        }
        Commands::List { status } => {
            let rows: Vec<TaskRow> = queue
                .tasks_by_status(status.into())
                .await?
                .into_iter()
                .map(TaskRow::from)
                .collect();
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
                OutputFormat::Table => print_table(&rows),
            }
        }
        Commands::Retry { id } => {
            let new_id = queue.retry_failed(TaskId::new(id)).await?;
            println!("task {id} re-enqueued as {new_id}");
        }
        Commands::Discard { id } => {
            let id = TaskId::new(id);
            let task = store
                .get_task(id)
                .await?
                .ok_or(StoreError::NotFound(id))
                .with_context(|| format!("cannot discard task {id}"))?;
            if task.status != TaskStatus::Failed {
                anyhow::bail!("task {id} is {}, only failed tasks can be discarded", task.status);
            }
            store.delete_task(id).await?;
            println!("task {id} discarded");
        }
        Commands::Recover => {
            let reset = store.reset_processing_to_pending().await?;
            println!("{reset} task(s) reset to pending");
        }
    }

    store.pool().close().await;
    Ok(())
}

fn print_table(rows: &[TaskRow]) {
    if rows.is_empty() {
        println!("no tasks");
        return;
    }
    println!(
        "{:>6}  {:<17}  {:<24}  {:>7}  {:<30}  {}",
        "ID", "TYPE", "KEY", "RETRIES", "CREATED", "ERROR"
    );
    for row in rows {
        println!(
            "{:>6}  {:<17}  {:<24}  {:>7}  {:<30}  {}",
            row.id,
            row.task_type,
            row.key,
            row.retry_count,
            row.created_at.to_rfc3339(),
            row.error.as_deref().unwrap_or("-"),
        );
    }
}
