//! The four interchangeable limit algorithms.
//!
//! Each strategy reads the tier's record through a [`StateStore`], computes the new state from
//! the record and the supplied time, writes it back when the request is admitted, and returns
//! a [`LimitDecision`]. Given the same record and time, a strategy always decides the same way.
//! Denials never write.

mod fixed_window;
mod sliding_counter;
mod sliding_log;
mod token_bucket;

pub use fixed_window::FixedWindow;
pub use sliding_counter::SlidingWindowCounter;
pub use sliding_log::SlidingWindowLog;
pub use token_bucket::TokenBucket;

use crate::decision::LimitDecision;
use crate::error::LimiterError;
use crate::rules::{Algorithm, Tier};
use crate::store::{StateStore, StorageKey, StorageRecord, WindowCount};
use async_trait::async_trait;

/// A limit algorithm.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Which algorithm this is.
    fn algorithm(&self) -> Algorithm;

    /// Decide one request against `tier`, reading and writing state at `key`.
    async fn evaluate(
        &self,
        store: &dyn StateStore,
        key: &StorageKey,
        tier: &Tier,
        now_ms: u64,
    ) -> Result<LimitDecision, LimiterError>;
}

/// The strategy implementing `algorithm`.
pub fn strategy_for(algorithm: Algorithm) -> &'static dyn Strategy {
    match algorithm {
        Algorithm::TokenBucket => &TokenBucket,
        Algorithm::FixedWindow => &FixedWindow,
        Algorithm::SlidingWindowLog => &SlidingWindowLog,
        Algorithm::SlidingWindowCounter => &SlidingWindowCounter,
    }
}

/// Whole seconds to wait for `wait_ms`, never less than one.
pub(crate) fn retry_after_secs(wait_ms: u64) -> u64 {
    wait_ms.div_ceil(1_000).max(1)
}

/// Start of the epoch-aligned window containing `now_ms`.
pub(crate) fn window_start(now_ms: u64, window_ms: u64) -> u64 {
    (now_ms / window_ms) * window_ms
}

pub(crate) fn allow(
    algorithm: Algorithm,
    tier: &Tier,
    remaining: u64,
    reset_at_ms: u64,
) -> LimitDecision {
    LimitDecision {
        allowed: true,
        remaining,
        reset_at_ms,
        retry_after_secs: None,
        algorithm: algorithm.as_str(),
        tier: Some(tier.name().to_string()),
        limit: tier.max_requests(),
        tier_results: Vec::new(),
    }
}

pub(crate) fn deny(
    algorithm: Algorithm,
    tier: &Tier,
    reset_at_ms: u64,
    wait_ms: u64,
) -> LimitDecision {
    LimitDecision {
        allowed: false,
        remaining: 0,
        reset_at_ms,
        retry_after_secs: Some(retry_after_secs(wait_ms)),
        algorithm: algorithm.as_str(),
        tier: Some(tier.name().to_string()),
        limit: tier.max_requests(),
        tier_results: Vec::new(),
    }
}

/// Read a window counter, rejecting records of another kind.
pub(crate) async fn read_window(
    store: &dyn StateStore,
    key: &StorageKey,
) -> Result<Option<WindowCount>, LimiterError> {
    match store.get(key.as_str()).await? {
        None => Ok(None),
        Some(StorageRecord::Window(window)) => Ok(Some(window)),
        Some(_) => Err(LimiterError::UnexpectedRecord {
            key: key.to_string(),
            expected: "window",
        }),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_algorithm_has_a_strategy() {
        for algorithm in Algorithm::ALL {
            assert_eq!(strategy_for(algorithm).algorithm(), algorithm);
        }
    }

    #[test]
    fn retry_after_rounds_up_with_floor_of_one() {
        assert_eq!(retry_after_secs(0), 1);
        assert_eq!(retry_after_secs(1), 1);
        assert_eq!(retry_after_secs(1_000), 1);
        assert_eq!(retry_after_secs(1_001), 2);
    }

    #[test]
    fn window_start_uses_integer_division() {
        assert_eq!(window_start(0, 1_000), 0);
        assert_eq!(window_start(999, 1_000), 0);
        assert_eq!(window_start(1_000, 1_000), 1_000);
        assert_eq!(window_start(1_700_000_123_456, 60_000), 1_700_000_100_000);
    }
}
