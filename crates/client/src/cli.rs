//! CLI definitions for the queue inspector.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Inspect and repair a local action queue database.
///
/// The inspector never runs handlers; the owning application drains.
#[derive(Parser)]
#[command(name = "actionq")]
#[command(version)]
pub(crate) struct Cli {
    /// Queue database path (defaults to the per-user data directory)
    #[arg(long, env = "ACTIONQ_DB_PATH", global = true)]
    pub db: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table, global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum StatusArg {
    Pending,
    Processing,
    Failed,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Show task counts per status
    Status,

    /// List tasks with the given status, oldest first
    List {
        #[arg(value_enum)]
        status: StatusArg,
    },

    /// Re-enqueue a failed task with a fresh attempt budget
    Retry {
        /// Task id
        id: i64,
    },

    /// Delete a failed task
    Discard {
        /// Task id
        id: i64,
    },

    /// Reset tasks stuck in `processing` to `pending`
    ///
    /// Only run this while the application is stopped.
    Recover,
}
