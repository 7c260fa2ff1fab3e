//! Client sync configuration.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use kvsync_engine::DEFAULT_MAX_KEY_LEN;

/// Timing and retry knobs for a [`ClientSyncCache`](crate::ClientSyncCache).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Quiet period after a change event before pulling a snapshot
    pub debounce: Duration,
    /// Longest a burst of events may postpone a pull
    pub max_debounce: Duration,
    /// Interval of the unconditional reconciliation pass
    pub safety_net_interval: Duration,
    /// Bound on one write or snapshot request
    pub write_timeout: Duration,
    /// Attempts per write before it is abandoned
    pub max_write_attempts: usize,
    /// First retry delay
    pub retry_min_delay: Duration,
    /// Retry delay ceiling
    pub retry_max_delay: Duration,
    /// Interval of the polling change feed
    pub poll_interval: Duration,
    /// Silence on the change stream after which it is considered lost
    pub heartbeat_timeout: Duration,
    /// Capacity of the application event channel
    pub event_buffer: usize,
    /// Longest key accepted locally, in bytes
    pub max_key_len: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(200),
            max_debounce: Duration::from_secs(1),
            safety_net_interval: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
            max_write_attempts: 4,
            retry_min_delay: Duration::from_millis(200),
            retry_max_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(45),
            event_buffer: 256,
            max_key_len: DEFAULT_MAX_KEY_LEN,
        }
    }
}

impl SyncConfig {
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self.max_debounce = self.max_debounce.max(debounce);
        self
    }

    pub fn with_safety_net_interval(mut self, interval: Duration) -> Self {
        self.safety_net_interval = interval;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_max_write_attempts(mut self, attempts: usize) -> Self {
        self.max_write_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delays(mut self, min: Duration, max: Duration) -> Self {
        self.retry_min_delay = min;
        self.retry_max_delay = max.max(min);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Backoff between attempts of one write; yields
    /// `max_write_attempts - 1` delays.
    pub(crate) fn write_backoff(&self) -> ExponentialBackoff {
        ExponentialBuilder::default()
            .with_min_delay(self.retry_min_delay)
            .with_max_delay(self.retry_max_delay)
            .with_max_times(self.max_write_attempts.saturating_sub(1))
            .build()
    }

    /// Backoff for reconnects and bootstrap; never runs out.
    pub(crate) fn reconnect_backoff(&self) -> ExponentialBackoff {
        ExponentialBuilder::default()
            .with_min_delay(self.retry_min_delay)
            .with_max_delay(self.retry_max_delay)
            .with_jitter()
            .without_max_times()
            .build()
    }
}
