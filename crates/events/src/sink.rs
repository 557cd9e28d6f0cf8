//! Notification sink abstraction.
//!
//! A sink is the seam between the queue and whatever presents outcomes to the
//! user (toasts, badges, logs). The queue never reaches for a global event
//! bus; it is handed a sink at construction.
//!
//! ## Delivery
//!
//! - **Best-effort**: a sink failure is logged by the caller and never changes
//!   task state. The store, not the sink, is the source of truth.
//! - **No payload on `QueueChanged`**: consumers re-query counts by status
//!   instead of reconstructing state from events.
//! - **Possibly repeated**: a task that runs twice after a crash can produce
//!   two success notifications. Consumers should treat them as idempotent.
//!
//! ## Ordering
//!
//! Events from one key group arrive in the order its tasks settled. Events
//! from different groups interleave freely, since lanes run concurrently.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use thiserror::Error;

use crate::event::QueueEvent;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Internal lock poisoning.
    #[error("notification sink lock poisoned")]
    Poisoned,

    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Receiver side of an in-process subscription.
///
/// Each subscription gets its own copy of every event published after it was
/// created.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything received so far, without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Consumer of queue lifecycle notifications.
///
/// `notify` is called from inside drain lanes, so implementations must not
/// block for long. Hand slow work (network, UI thread) off to a channel, as
/// [`InMemoryNotificationSink`](crate::InMemoryNotificationSink) does.
///
/// ## Usage Pattern
///
/// ```ignore
/// let ui = Arc::new(InMemoryNotificationSink::new());
/// let events = ui.subscribe();
/// let sink = FanOutSink::new().with(ui).with(Arc::new(TracingSink));
///
/// let queue = ActionQueue::new(store, registry, Arc::new(sink), config)?;
/// for event in events.drain() {
///     render(event);
/// }
/// ```
///
/// ## Errors
///
/// Returning an error only produces a `warn!` in the engine. It is never
/// retried and does not affect the task that triggered the event.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: QueueEvent) -> Result<(), SinkError>;
}

impl<S> NotificationSink for Arc<S>
where
    S: NotificationSink + ?Sized,
{
    fn notify(&self, event: QueueEvent) -> Result<(), SinkError> {
        (**self).notify(event)
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn notify(&self, _event: QueueEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Forwards each event to several sinks.
///
/// Every sink sees the event even if an earlier one fails; the first error is
/// returned.
#[derive(Default, Clone)]
pub struct FanOutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanOutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl NotificationSink for FanOutSink {
    fn notify(&self, event: QueueEvent) -> Result<(), SinkError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.notify(event.clone()) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
