use super::{allow, deny, Strategy};
use crate::decision::LimitDecision;
use crate::error::LimiterError;
use crate::rules::{Algorithm, Tier};
use crate::store::{RequestLog, StateStore, StorageKey, StorageRecord};
use async_trait::async_trait;

/// Exact trailing-window limit backed by the list of admission times.
///
/// Memory grows with traffic inside the window, so reserve it for tiers where precision
/// matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlidingWindowLog;

#[async_trait]
impl Strategy for SlidingWindowLog {
    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindowLog
    }

    async fn evaluate(
        &self,
        store: &dyn StateStore,
        key: &StorageKey,
        tier: &Tier,
        now_ms: u64,
    ) -> Result<LimitDecision, LimiterError> {
        let window = tier.window_ms();
        let mut timestamps = match store.get(key.as_str()).await? {
            None => Vec::new(),
            Some(StorageRecord::Log(log)) => log.timestamps,
            Some(_) => {
                return Err(LimiterError::UnexpectedRecord {
                    key: key.to_string(),
                    expected: "log",
                })
            }
        };
        // keep t > now - window
        timestamps.retain(|&t| t.saturating_add(window) > now_ms);

        let count = timestamps.len() as u64;
        if count >= tier.max_requests() {
            let oldest = timestamps.first().copied().unwrap_or(now_ms);
            let reset_at_ms = oldest.saturating_add(window);
            return Ok(deny(
                Algorithm::SlidingWindowLog,
                tier,
                reset_at_ms,
                reset_at_ms.saturating_sub(now_ms),
            ));
        }

        timestamps.push(now_ms);
        let reset_at_ms = timestamps.first().copied().unwrap_or(now_ms).saturating_add(window);
        let retention = tier.retention_ms();
        store
            .set(
                key.as_str(),
                StorageRecord::Log(RequestLog {
                    timestamps,
                    expires_at_ms: now_ms.saturating_add(retention),
                }),
                retention,
            )
            .await?;

        Ok(allow(Algorithm::SlidingWindowLog, tier, tier.max_requests() - count - 1, reset_at_ms))
    }
}
