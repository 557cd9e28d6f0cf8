//! `actionq-core` — domain building blocks for the durable action queue.
//!
//! This crate contains **pure domain** types (no IO, no async runtime):
//! identifiers, the closed set of task types with their typed payloads,
//! the task record and its attempt state machine, and the error model shared
//! by stores and handlers.

pub mod context;
pub mod error;
pub mod id;
pub mod task;

pub use context::{
    ContextKind, KickUserContext, SaveUserConfigContext, SendMessageContext, TaskContext, TaskType,
    UnknownTaskType,
};
pub use error::{HandlerError, StoreError, StoreResult};
pub use id::{MessageId, TaskId};
pub use task::{AttemptOutcome, NewTask, Task, TaskStatus};
