//! In-memory fan-out sink for tests and embedding UIs.

use std::sync::{Mutex, mpsc};

use crate::event::QueueEvent;
use crate::sink::{NotificationSink, SinkError, Subscription};

/// Broadcasts every event to all live subscriptions.
///
/// - No IO / no async
/// - Dead subscribers are pruned on publish
#[derive(Debug, Default)]
pub struct InMemoryNotificationSink {
    subscribers: Mutex<Vec<mpsc::Sender<QueueEvent>>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription<QueueEvent> {
        let (tx, rx) = mpsc::channel();

        // A poisoned lock still yields a subscription; it just never
        // receives anything.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        Subscription::new(rx)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn notify(&self, event: QueueEvent) -> Result<(), SinkError> {
        let mut subs = self.subscribers.lock().map_err(|_| SinkError::Poisoned)?;
        subs.retain(|tx| tx.send(event.clone()).is_ok());
        Ok(())
    }
}
