//! Queue lifecycle notifications.
//!
//! The engine reports what happened to tasks through a [`NotificationSink`].
//! Sinks are injected at construction; there is no global bus.

pub mod event;
pub mod in_memory;
pub mod sink;
pub mod tracing_sink;

pub use event::QueueEvent;
pub use in_memory::InMemoryNotificationSink;
pub use sink::{FanOutSink, NoopSink, NotificationSink, SinkError, Subscription};
pub use tracing_sink::TracingSink;
