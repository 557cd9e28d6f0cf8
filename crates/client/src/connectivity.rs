//! Connectivity tracking and the drain-on-reconnect loop.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use actionq_queue::ActionQueue;

/// Connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    Online,
    Offline,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OfflineError {
    #[error("client is offline; operation requires network connection")]
    Offline,
}

/// Shared view of whether the client can reach the network.
///
/// The embedding application feeds it (`set_online`/`set_offline`); handlers
/// consult it before touching the network, and [`spawn`](Self::spawn) turns
/// every Offline→Online transition into a queue drain.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    state: Arc<watch::Sender<ConnectivityState>>,
    shutdown: Arc<Notify>,
}

impl ConnectivityMonitor {
    pub fn new(initial: ConnectivityState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            state: Arc::new(tx),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    pub fn is_offline(&self) -> bool {
        self.state() == ConnectivityState::Offline
    }

    /// Record the current state. Repeating the same state is a no-op.
    pub fn set_state(&self, next: ConnectivityState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            tracing::info!(state = ?next, "connectivity changed");
        }
    }

    pub fn set_online(&self) {
        self.set_state(ConnectivityState::Online);
    }

    pub fn set_offline(&self) {
        self.set_state(ConnectivityState::Offline);
    }

    /// Ensure the client is online; return error if offline.
    pub fn require_online(&self) -> Result<(), OfflineError> {
        if self.is_offline() {
            Err(OfflineError::Offline)
        } else {
            Ok(())
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    /// Drain `queue` whenever connectivity comes back.
    ///
    /// Runs until [`shutdown`](Self::shutdown) is called.
    pub fn spawn(&self, queue: ActionQueue) -> JoinHandle<()> {
        let mut rx = self.state.subscribe();
        let shutdown = Arc::clone(&self.shutdown);

        tokio::spawn(async move {
            tracing::info!("connectivity watcher started");
            let mut last = *rx.borrow_and_update();

            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        tracing::info!("connectivity watcher received shutdown signal");
                        break;
                    }
                    changed = rx.changed() => {
                        if changed.is_err() {
                            tracing::debug!("connectivity sender dropped; watcher exiting");
                            break;
                        }
                        let current = *rx.borrow_and_update();
                        let restored = last == ConnectivityState::Offline
                            && current == ConnectivityState::Online;
                        last = current;

                        if restored {
                            tracing::info!("connectivity restored; draining queue");
                            match queue.drain().await {
                                Ok(report) => tracing::debug!(
                                    dispatched = report.dispatched,
                                    coalesced = report.coalesced,
                                    "reconnect drain finished"
                                ),
                                Err(e) => tracing::error!(error = %e, "reconnect drain failed"),
                            }
                        }
                    }
                }
            }
        })
    }

    /// Stop the watcher started by [`spawn`](Self::spawn).
    pub fn shutdown(&self) {
        // `notify_one` stores a permit, so a watcher that is mid-drain still
        // sees it.
        self.shutdown.notify_one();
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(ConnectivityState::Online)
    }
}
