//! Limiter configuration.
//!
//! Every field has a documented default; [`LimiterConfigBuilder::build`] validates the whole
//! set so a running limiter never sees a zero interval or threshold.

use crate::error::ConfigError;
use std::time::Duration;

/// Default StorageKey prefix.
pub const DEFAULT_KEY_PREFIX: &str = "ratelimit";
/// Default number of consecutive remote failures before the breaker opens.
pub const DEFAULT_FAILURE_THRESHOLD: usize = 5;
/// Default bound on a single remote store call.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_millis(500);
/// Default Cleanup Scheduler period.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Default Local Store capacity ceiling.
pub const DEFAULT_MAX_LOCAL_ENTRIES: usize = 10_000;
/// Default reconnect ping period while the breaker is open.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
/// Default synthetic reset window of a fail-open decision.
pub const DEFAULT_FAIL_OPEN_WINDOW: Duration = Duration::from_secs(1);

/// Validated configuration for a [`RateLimiter`](crate::RateLimiter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    key_prefix: String,
    failure_threshold: usize,
    backend_timeout: Duration,
    cleanup_interval: Duration,
    max_local_entries: usize,
    reconnect_interval: Duration,
    fail_open_window: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            max_local_entries: DEFAULT_MAX_LOCAL_ENTRIES,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            fail_open_window: DEFAULT_FAIL_OPEN_WINDOW,
        }
    }
}

impl LimiterConfig {
    /// Start from the defaults.
    pub fn builder() -> LimiterConfigBuilder {
        LimiterConfigBuilder { config: Self::default() }
    }

    /// First segment of every StorageKey.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Consecutive remote failures that open the breaker.
    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    /// Bound on each remote call; exceeding it counts as a failure.
    pub fn backend_timeout(&self) -> Duration {
        self.backend_timeout
    }

    /// Period of the local store sweep.
    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    /// Local store size above which least-recently-used entries are evicted.
    pub fn max_local_entries(&self) -> usize {
        self.max_local_entries
    }

    /// Period of the reconnect ping while the breaker is open.
    pub fn reconnect_interval(&self) -> Duration {
        self.reconnect_interval
    }

    /// Reset window reported on a fail-open decision.
    pub fn fail_open_window(&self) -> Duration {
        self.fail_open_window
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.key_prefix.trim().is_empty() {
            return Err(ConfigError::EmptyKeyPrefix);
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold { provided: 0 });
        }
        if self.max_local_entries == 0 {
            return Err(ConfigError::InvalidCapacity { provided: 0 });
        }
        for (field, value) in [
            ("backend_timeout", self.backend_timeout),
            ("cleanup_interval", self.cleanup_interval),
            ("reconnect_interval", self.reconnect_interval),
            ("fail_open_window", self.fail_open_window),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field, value });
            }
        }
        Ok(())
    }
}

/// Builder for [`LimiterConfig`].
#[derive(Debug, Clone)]
pub struct LimiterConfigBuilder {
    config: LimiterConfig,
}

impl LimiterConfigBuilder {
    /// Set the StorageKey prefix. Must be non-empty.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    /// Set the breaker threshold. Must be > 0.
    pub fn failure_threshold(mut self, threshold: usize) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set the per-call remote timeout. Must be > 0.
    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.config.backend_timeout = timeout;
        self
    }

    /// Set the sweep period. Must be > 0.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    /// Set the local store capacity ceiling. Must be > 0.
    pub fn max_local_entries(mut self, max: usize) -> Self {
        self.config.max_local_entries = max;
        self
    }

    /// Set the reconnect ping period. Must be > 0.
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval = interval;
        self
    }

    /// Set the fail-open reset window. Must be > 0.
    pub fn fail_open_window(mut self, window: Duration) -> Self {
        self.config.fail_open_window = window;
        self
    }

    /// Validate and produce the config.
    pub fn build(self) -> Result<LimiterConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = LimiterConfig::builder().build().expect("defaults validate");
        assert_eq!(cfg, LimiterConfig::default());
        assert_eq!(cfg.key_prefix(), "ratelimit");
        assert_eq!(cfg.failure_threshold(), 5);
        assert_eq!(cfg.cleanup_interval(), Duration::from_secs(300));
    }

    #[test]
    fn rejects_zero_failure_threshold() {
        let err = LimiterConfig::builder().failure_threshold(0).build().unwrap_err();
        assert_eq!(err, ConfigError::InvalidFailureThreshold { provided: 0 });
    }

    #[test]
    fn rejects_blank_prefix() {
        let err = LimiterConfig::builder().key_prefix("  ").build().unwrap_err();
        assert_eq!(err, ConfigError::EmptyKeyPrefix);
    }

    #[test]
    fn rejects_zero_durations_by_name() {
        let err = LimiterConfig::builder().cleanup_interval(Duration::ZERO).build().unwrap_err();
        assert_eq!(
            err,
            ConfigError::ZeroDuration { field: "cleanup_interval", value: Duration::ZERO }
        );
        let err = LimiterConfig::builder().backend_timeout(Duration::ZERO).build().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration { field: "backend_timeout", .. }));
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = LimiterConfig::builder().max_local_entries(0).build().unwrap_err();
        assert_eq!(err, ConfigError::InvalidCapacity { provided: 0 });
    }
}
