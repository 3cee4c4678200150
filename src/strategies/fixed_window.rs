use super::{allow, deny, read_window, window_start, Strategy};
use crate::decision::LimitDecision;
use crate::error::LimiterError;
use crate::rules::{Algorithm, Tier};
use crate::store::{StateStore, StorageKey, StorageRecord, WindowCount};
use async_trait::async_trait;

/// Counter per epoch-aligned window.
///
/// Cheap, but a burst straddling a boundary can see up to `2 × max_requests` admitted in a
/// short span.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedWindow;

#[async_trait]
impl Strategy for FixedWindow {
    fn algorithm(&self) -> Algorithm {
        Algorithm::FixedWindow
    }

    async fn evaluate(
        &self,
        store: &dyn StateStore,
        key: &StorageKey,
        tier: &Tier,
        now_ms: u64,
    ) -> Result<LimitDecision, LimiterError> {
        let start = window_start(now_ms, tier.window_ms());
        let reset_at_ms = start.saturating_add(tier.window_ms());
        let window_key = key.window(start);

        let count = read_window(store, &window_key).await?.map_or(0, |w| w.count);
        if count >= tier.max_requests() {
            return Ok(deny(Algorithm::FixedWindow, tier, reset_at_ms, reset_at_ms.saturating_sub(now_ms)));
        }

        let count = count + 1;
        let retention = tier.retention_ms();
        store
            .set(
                window_key.as_str(),
                StorageRecord::Window(WindowCount {
                    count,
                    expires_at_ms: now_ms.saturating_add(retention),
                }),
                retention,
            )
            .await?;

        Ok(allow(Algorithm::FixedWindow, tier, tier.max_requests() - count, reset_at_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RequestLog;
    use crate::strategies::test_support::{key, local, tier};

    #[tokio::test]
    async fn boundary_reset() {
        let (store, clock) = local(0);
        let tier = tier(5, 1_000);
        for expected_remaining in (0..5).rev() {
            let d = FixedWindow.evaluate(&store, &key(), &tier, 0).await.unwrap();
            assert!(d.allowed);
            assert_eq!(d.remaining, expected_remaining);
            assert_eq!(d.reset_at_ms, 1_000);
        }

        let denied = FixedWindow.evaluate(&store, &key(), &tier, 0).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_secs, Some(1));
        assert_eq!(denied.algorithm, "fixed-window");

        clock.set(1_000);
        let next = FixedWindow.evaluate(&store, &key(), &tier, 1_000).await.unwrap();
        assert!(next.allowed);
        assert_eq!(next.remaining, 4);
        assert_eq!(next.reset_at_ms, 2_000);
    }

    #[tokio::test]
    async fn windows_live_under_their_own_keys() {
        let (store, clock) = local(2_500);
        let tier = tier(3, 1_000);
        FixedWindow.evaluate(&store, &key(), &tier, 2_500).await.unwrap();
        let entry = store.entry(key().window(2_000).as_str()).unwrap();
        assert_eq!(entry.expires_at_ms, 4_500);
        assert!(store.entry(key().as_str()).is_none());

        clock.set(3_000);
        FixedWindow.evaluate(&store, &key(), &tier, 3_000).await.unwrap();
        assert!(store.entry(key().window(3_000).as_str()).is_some());
    }

    #[tokio::test]
    async fn straddling_a_boundary_admits_twice_the_limit() {
        let (store, clock) = local(999);
        let tier = tier(2, 1_000);
        let mut admitted = 0;
        for now in [999, 999, 999, 1_000, 1_000, 1_000] {
            clock.set(now);
            if FixedWindow.evaluate(&store, &key(), &tier, now).await.unwrap().allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 4);
    }

    #[tokio::test]
    async fn foreign_record_is_rejected() {
        let (store, _clock) = local(0);
        store.write(
            key().window(0).as_str(),
            StorageRecord::Log(RequestLog { timestamps: vec![], expires_at_ms: 10_000 }),
            10_000,
        );
        let err = FixedWindow.evaluate(&store, &key(), &tier(1, 1_000), 0).await.unwrap_err();
        assert!(matches!(err, LimiterError::UnexpectedRecord { expected: "window", .. }));
    }
}
