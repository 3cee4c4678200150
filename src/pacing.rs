//! Advisory pacing for admitted requests.
//!
//! A [`Pacer`] turns an allowed [`LimitDecision`] into a wait before the request goes out,
//! using [`calculate_delay`]. [`RateLimitService`](crate::RateLimitService) paces through it
//! when built with [`with_pacing`](crate::RateLimitLayer::with_pacing).
//!
//! The wait itself goes through a [`Sleeper`], so tests can record pacing without sleeping.

use crate::advisory::calculate_delay;
use crate::decision::LimitDecision;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Waits out a pacing delay.
pub trait Sleeper: Send + Sync + fmt::Debug {
    fn sleep(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Waits on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(delay))
    }
}

/// Logs each pacing delay instead of waiting. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays paced so far, oldest first.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Time a client would have spent pacing.
    pub fn total(&self) -> Duration {
        self.delays().into_iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(delay);
        }
        Box::pin(async {})
    }
}

/// Scales a base delay by the remaining quota of each admitted decision.
#[derive(Clone, Debug)]
pub struct Pacer {
    base_delay_ms: u64,
    sleeper: Arc<dyn Sleeper>,
}

impl Pacer {
    /// Pace on the tokio timer.
    pub fn new(base_delay: Duration) -> Self {
        Self::with_sleeper(base_delay, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(base_delay: Duration, sleeper: Arc<dyn Sleeper>) -> Self {
        let base_delay_ms = u64::try_from(base_delay.as_millis()).unwrap_or(u64::MAX);
        Self { base_delay_ms, sleeper }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Delay this pacer would wait for `decision`.
    pub fn delay_for(&self, decision: &LimitDecision) -> Duration {
        Duration::from_millis(calculate_delay(decision, self.base_delay_ms))
    }

    /// Wait the delay for `decision` and return it. Zero delays skip the sleeper.
    pub async fn pace(&self, decision: &LimitDecision) -> Duration {
        let delay = self.delay_for(decision);
        if !delay.is_zero() {
            tracing::trace!(?delay, remaining = decision.remaining, "pacing request");
            self.sleeper.sleep(delay).await;
        }
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admitted(remaining: u64, limit: u64) -> LimitDecision {
        LimitDecision {
            allowed: true,
            remaining,
            reset_at_ms: 60_000,
            retry_after_secs: None,
            algorithm: "fixed-window",
            tier: Some("per-host".to_string()),
            limit,
            tier_results: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn paces_on_the_tokio_timer() {
        let start = tokio::time::Instant::now();
        let waited = Pacer::new(Duration::from_millis(250)).pace(&admitted(1, 10)).await;
        assert_eq!(waited, Duration::from_secs(1));
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn delay_grows_as_quota_drains() {
        let sleeper = RecordingSleeper::new();
        let pacer = Pacer::with_sleeper(Duration::from_millis(100), Arc::new(sleeper.clone()));
        for remaining in [9, 6, 3, 1] {
            pacer.pace(&admitted(remaining, 10)).await;
        }
        assert_eq!(
            sleeper.delays(),
            [50, 100, 200, 400].map(Duration::from_millis).to_vec()
        );
        assert_eq!(sleeper.total(), Duration::from_millis(750));
    }

    #[tokio::test]
    async fn zero_delay_never_reaches_the_sleeper() {
        let sleeper = RecordingSleeper::new();
        let pacer = Pacer::with_sleeper(Duration::ZERO, Arc::new(sleeper.clone()));
        assert_eq!(pacer.pace(&admitted(1, 10)).await, Duration::ZERO);
        assert!(sleeper.delays().is_empty());
    }
}
