//! Queue configuration.

use std::time::Duration;

use tracing::warn;

use crate::error::QueueError;

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

pub const ENV_CONCURRENCY: &str = "ACTIONQ_CONCURRENCY";
pub const ENV_MIN_RETRY_DELAY_MS: &str = "ACTIONQ_MIN_RETRY_DELAY_MS";

/// When a failed task may run again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Dispatch attempts before a task fails terminally.
    pub max_attempts: u32,
    /// Minimum time between a failed attempt and the next one.
    ///
    /// Zero retries on the very next drain.
    pub min_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_retry_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum key groups executing at once.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Start a background drain after every enqueue.
    pub drain_on_enqueue: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            drain_on_enqueue: true,
        }
    }
}

impl QueueConfig {
    /// Zero is clamped to one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        if concurrency == 0 {
            warn!("queue concurrency must be at least 1; using 1");
        }
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_min_retry_delay(mut self, delay: Duration) -> Self {
        self.retry.min_retry_delay = delay;
        self
    }

    pub fn with_drain_on_enqueue(mut self, enabled: bool) -> Self {
        self.drain_on_enqueue = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.concurrency == 0 {
            return Err(QueueError::Config("concurrency must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(QueueError::Config("max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// Defaults overridden by `ACTIONQ_CONCURRENCY` and
    /// `ACTIONQ_MIN_RETRY_DELAY_MS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// Unparsable values are ignored with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_CONCURRENCY) {
            match raw.trim().parse::<usize>() {
                Ok(n) => config = config.with_concurrency(n),
                Err(e) => warn!(var = ENV_CONCURRENCY, value = %raw, error = %e, "ignoring invalid value"),
            }
        }

        if let Some(raw) = lookup(ENV_MIN_RETRY_DELAY_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config = config.with_min_retry_delay(Duration::from_millis(ms)),
                Err(e) => warn!(var = ENV_MIN_RETRY_DELAY_MS, value = %raw, error = %e, "ignoring invalid value"),
            }
        }

        config
    }
}
