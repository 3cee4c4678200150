use super::{allow, deny, read_window, window_start, Strategy};
use crate::decision::LimitDecision;
use crate::error::LimiterError;
use crate::rules::{Algorithm, Tier};
use crate::store::{StateStore, StorageKey, StorageRecord, WindowCount};
use async_trait::async_trait;

/// Constant-space approximation of the sliding log.
///
/// Keeps counters for the current and previous fixed windows and weights the previous one by
/// the share of it still inside the trailing window:
/// `estimated = previous × (window − elapsed) / window + current`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlidingWindowCounter;

/// Milliseconds from `now_ms` until the estimate first drops below `max`.
fn wait_ms(previous: u64, current: u64, max: u64, window: u64, elapsed: u64) -> u64 {
    let window_f = window as f64;
    if current < max && previous > 0 {
        // still in this window: the previous window's weight has to shrink
        let needed = window_f * (1.0 - (max - current) as f64 / previous as f64);
        (needed.max(0.0).floor() as u64).saturating_add(1).saturating_sub(elapsed).max(1)
    } else {
        // current alone is over the limit; it becomes "previous" in the next window
        let to_next = window - elapsed;
        let needed = window_f * (1.0 - max as f64 / current.max(1) as f64);
        to_next.saturating_add(needed.max(0.0).floor() as u64).saturating_add(1)
    }
}

#[async_trait]
impl Strategy for SlidingWindowCounter {
    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindowCounter
    }

    async fn evaluate(
        &self,
        store: &dyn StateStore,
        key: &StorageKey,
        tier: &Tier,
        now_ms: u64,
    ) -> Result<LimitDecision, LimiterError> {
        let window = tier.window_ms();
        let max = tier.max_requests();
        let current_start = window_start(now_ms, window);
        let elapsed = now_ms - current_start;
        let reset_at_ms = current_start.saturating_add(window);

        let current_key = key.window(current_start);
        let current = read_window(store, &current_key).await?.map_or(0, |w| w.count);
        let previous = match current_start.checked_sub(window) {
            Some(previous_start) => {
                read_window(store, &key.window(previous_start)).await?.map_or(0, |w| w.count)
            }
            None => 0,
        };

        let overlap = (window - elapsed) as f64 / window as f64;
        let estimated = previous as f64 * overlap + current as f64;

        if estimated >= max as f64 {
            let wait = wait_ms(previous, current, max, window, elapsed);
            return Ok(deny(Algorithm::SlidingWindowCounter, tier, reset_at_ms, wait));
        }

        let retention = tier.retention_ms();
        store
            .set(
                current_key.as_str(),
                StorageRecord::Window(WindowCount {
                    count: current + 1,
                    expires_at_ms: now_ms.saturating_add(retention),
                }),
                retention,
            )
            .await?;

        let remaining = (max as f64 - estimated - 1.0).max(0.0).floor() as u64;
        Ok(allow(Algorithm::SlidingWindowCounter, tier, remaining, reset_at_ms))
    }
}
