//! Durable action queue engine.
//!
//! Tasks are persisted through a [`TaskStore`] before they run, grouped by
//! ordering key, and executed by [`QueueEngine`] with one serial lane per key
//! and at most `concurrency` lanes at a time. [`ActionQueue`] is the public
//! entry point.

pub mod config;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod queue;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::{QueueConfig, RetryPolicy};
pub use error::QueueError;
pub use executor::{DrainReport, QueueEngine, TaskOutcome};
pub use handlers::{FnHandler, HandlerRegistry, TaskHandler, Unsupported, handler_fn};
pub use queue::{ActionQueue, QueueCounts};
pub use store::{InMemoryTaskStore, TaskStore};
