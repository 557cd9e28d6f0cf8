//! Process-wide tracing setup for binaries embedding the queue.
//!
//! Libraries in this workspace only emit `tracing` events; installing a
//! subscriber is left to the binary.

pub mod tracing;

pub use crate::tracing::{LogConfig, LogFormat};

/// Initialize process-wide tracing with [`LogConfig::from_env`].
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    crate::tracing::init(&LogConfig::from_env());
}

/// Initialize with an explicit configuration.
pub fn init_with(config: &LogConfig) {
    crate::tracing::init(config);
}
