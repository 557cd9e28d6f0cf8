//! Sink that turns notifications into log lines.

use crate::event::QueueEvent;
use crate::sink::{NotificationSink, SinkError};

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, event: QueueEvent) -> Result<(), SinkError> {
        match &event {
            QueueEvent::QueueChanged => {
                tracing::trace!(event = event.name(), "queue changed");
            }
            QueueEvent::TaskSucceeded {
                task_id,
                task_type,
                message,
            } => {
                tracing::info!(
                    event = event.name(),
                    task_id = %task_id,
                    task_type = %task_type,
                    "{message}"
                );
            }
            QueueEvent::TaskFailed {
                task_id,
                task_type,
                message,
                error,
            } => {
                tracing::error!(
                    event = event.name(),
                    task_id = %task_id,
                    task_type = %task_type,
                    error = %error,
                    "{message}"
                );
            }
        }
        Ok(())
    }
}
