//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use std::time::Duration;

/// Default interval between polls of a device.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default time without a successful poll after which a device is stale.
pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Default number of consecutive authentication failures that raise a repair signal.
pub const DEFAULT_AUTH_FAILURE_THRESHOLD: u32 = 3;

/// Default upper bound on a single fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the sync coordinator.
///
/// Repeated transient failures are retried at `poll_interval`; there is no
/// backoff.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between polls of each device.
    pub poll_interval: Duration,
    /// Time without a successful poll after which a device is stale.
    pub stale_timeout: Duration,
    /// Consecutive authentication failures that raise a repair signal.
    pub auth_failure_threshold: u32,
    /// Upper bound on a single fetch. `None` leaves timeouts to the API.
    pub fetch_timeout: Option<Duration>,
    /// Capacity of each device's update channel.
    pub update_channel_capacity: usize,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            stale_timeout: DEFAULT_STALE_TIMEOUT,
            auth_failure_threshold: DEFAULT_AUTH_FAILURE_THRESHOLD,
            fetch_timeout: Some(DEFAULT_FETCH_TIMEOUT),
            update_channel_capacity: 16,
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the stale timeout.
    pub fn with_stale_timeout(mut self, timeout: Duration) -> Self {
        self.stale_timeout = timeout;
        self
    }

    /// Sets the authentication failure threshold.
    pub fn with_auth_failure_threshold(mut self, threshold: u32) -> Self {
        self.auth_failure_threshold = threshold;
        self
    }

    /// Sets the fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Sets the capacity of each device's update channel.
    pub fn with_update_channel_capacity(mut self, capacity: usize) -> Self {
        self.update_channel_capacity = capacity;
        self
    }

    /// Checks that the configuration can drive a coordinator.
    pub fn validate(&self) -> SyncResult<()> {
        if self.poll_interval.is_zero() {
            return Err(SyncError::Setup("poll interval must be non-zero".into()));
        }
        if self.auth_failure_threshold == 0 {
            return Err(SyncError::Setup(
                "auth failure threshold must be at least 1".into(),
            ));
        }
        if self.update_channel_capacity == 0 {
            return Err(SyncError::Setup(
                "update channel capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.stale_timeout, Duration::from_secs(86_400));
        assert_eq!(config.auth_failure_threshold, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_poll_interval(Duration::from_secs(10))
            .with_stale_timeout(Duration::from_secs(60))
            .with_auth_failure_threshold(5)
            .with_fetch_timeout(None)
            .with_update_channel_capacity(4);

        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.stale_timeout, Duration::from_secs(60));
        assert_eq!(config.auth_failure_threshold, 5);
        assert_eq!(config.fetch_timeout, None);
        assert_eq!(config.update_channel_capacity, 4);
    }

    #[test]
    fn validate_rejects_degenerate_values() {
        assert!(SyncConfig::new()
            .with_poll_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(SyncConfig::new()
            .with_auth_failure_threshold(0)
            .validate()
            .is_err());
        assert!(SyncConfig::new()
            .with_update_channel_capacity(0)
            .validate()
            .is_err());
    }
}
