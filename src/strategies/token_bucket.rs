use super::{allow, deny, Strategy};
use crate::decision::LimitDecision;
use crate::error::LimiterError;
use crate::rules::{Algorithm, Tier};
use crate::store::{BucketState, StateStore, StorageKey, StorageRecord};
use async_trait::async_trait;

/// Continuously refilled bucket of capacity `max_requests`.
///
/// The bucket gains `max_requests / window_ms` tokens per millisecond, so short bursts up to
/// the capacity pass while the long-run rate stays at `max_requests` per window. A key with no
/// record starts full.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenBucket;

/// Tokens in the bucket at `now_ms`, before this request.
fn refill(state: Option<&BucketState>, tier: &Tier, now_ms: u64) -> f64 {
    let capacity = tier.max_requests() as f64;
    match state {
        None => capacity,
        Some(state) => {
            let elapsed = now_ms.saturating_sub(state.last_refill_at_ms) as f64;
            // multiply before dividing so exact spacings refill exactly one token
            let added = elapsed * tier.max_requests() as f64 / tier.window_ms() as f64;
            (state.tokens.max(0.0) + added).min(capacity)
        }
    }
}

/// Milliseconds until `tokens` grows to `target`.
fn millis_until(tokens: f64, target: f64, tier: &Tier) -> u64 {
    let missing = (target - tokens).max(0.0);
    (missing * tier.window_ms() as f64 / tier.max_requests() as f64).ceil() as u64
}

#[async_trait]
impl Strategy for TokenBucket {
    fn algorithm(&self) -> Algorithm {
        Algorithm::TokenBucket
    }

    async fn evaluate(
        &self,
        store: &dyn StateStore,
        key: &StorageKey,
        tier: &Tier,
        now_ms: u64,
    ) -> Result<LimitDecision, LimiterError> {
        let state = match store.get(key.as_str()).await? {
            None => None,
            Some(StorageRecord::Bucket(state)) => Some(state),
            Some(_) => {
                return Err(LimiterError::UnexpectedRecord {
                    key: key.to_string(),
                    expected: "bucket",
                })
            }
        };

        let capacity = tier.max_requests() as f64;
        let tokens = refill(state.as_ref(), tier, now_ms);

        if tokens < 1.0 {
            let reset_at_ms = now_ms.saturating_add(millis_until(tokens, capacity, tier));
            return Ok(deny(Algorithm::TokenBucket, tier, reset_at_ms, millis_until(tokens, 1.0, tier)));
        }

        let tokens = tokens - 1.0;
        let retention = tier.retention_ms();
        store
            .set(
                key.as_str(),
                StorageRecord::Bucket(BucketState {
                    tokens,
                    last_refill_at_ms: now_ms,
                    expires_at_ms: now_ms.saturating_add(retention),
                }),
                retention,
            )
            .await?;

        Ok(allow(
            Algorithm::TokenBucket,
            tier,
            tokens.floor().max(0.0) as u64,
            now_ms.saturating_add(millis_until(tokens, capacity, tier)),
        ))
    }
}
