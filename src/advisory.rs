//! Caller-facing helpers derived from a [`LimitDecision`]: response-style headers and an
//! advisory pacing delay.
//!
//! Both are pure. The limiter never sleeps on the caller's behalf; honoring the suggested
//! delay is up to the caller (or the optional pacing in [`RateLimitLayer`](crate::RateLimitLayer)).

use crate::decision::LimitDecision;
use std::collections::BTreeMap;

/// Header name for the deciding tier's limit.
pub const LIMIT_HEADER: &str = "X-RateLimit-Limit";
/// Header name for remaining requests.
pub const REMAINING_HEADER: &str = "X-RateLimit-Remaining";
/// Header name for the reset time in epoch seconds.
pub const RESET_HEADER: &str = "X-RateLimit-Reset";
/// Header name for the algorithm.
pub const ALGORITHM_HEADER: &str = "X-RateLimit-Algorithm";
/// Header name for the retry delay in seconds.
pub const RETRY_AFTER_HEADER: &str = "Retry-After";

/// Standard rate limit headers for one decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// X-RateLimit-Limit
    pub limit: u64,
    /// X-RateLimit-Remaining
    pub remaining: u64,
    /// X-RateLimit-Reset: epoch seconds, rounded up
    pub reset: u64,
    /// X-RateLimit-Algorithm
    pub algorithm: &'static str,
    /// Retry-After, only on denials
    pub retry_after: Option<u64>,
}

impl From<&LimitDecision> for RateLimitHeaders {
    fn from(decision: &LimitDecision) -> Self {
        Self {
            limit: decision.limit,
            remaining: decision.remaining,
            reset: decision.reset_at_ms.div_ceil(1_000),
            algorithm: decision.algorithm,
            retry_after: decision.retry_after_secs,
        }
    }
}

impl RateLimitHeaders {
    /// Header name/value pairs; `Retry-After` is present only when set.
    pub fn to_header_pairs(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (LIMIT_HEADER, self.limit.to_string()),
            (REMAINING_HEADER, self.remaining.to_string()),
            (RESET_HEADER, self.reset.to_string()),
            (ALGORITHM_HEADER, self.algorithm.to_string()),
        ];
        if let Some(retry) = self.retry_after {
            headers.push((RETRY_AFTER_HEADER, retry.to_string()));
        }
        headers
    }

    /// Headers as a name → value map.
    pub fn to_map(&self) -> BTreeMap<&'static str, String> {
        self.to_header_pairs().into_iter().collect()
    }
}

/// Format a decision as headers.
pub fn rate_limit_headers(decision: &LimitDecision) -> BTreeMap<&'static str, String> {
    RateLimitHeaders::from(decision).to_map()
}

/// Minimum wait after a denial.
pub const MIN_DENIAL_DELAY_MS: u64 = 1_000;

/// Suggested delay before the caller's next request.
///
/// A denial with a retry hint waits at least a second. Otherwise the base delay is scaled by
/// how much of the deciding tier's quota is left: above 80% halves it, above 50% keeps it,
/// above 20% doubles it, and anything lower quadruples it.
pub fn calculate_delay(decision: &LimitDecision, base_delay_ms: u64) -> u64 {
    if !decision.allowed {
        if let Some(retry) = decision.retry_after_secs {
            return retry.saturating_mul(1_000).max(MIN_DENIAL_DELAY_MS);
        }
    }

    let ratio = if decision.limit == 0 {
        0.0
    } else {
        decision.remaining as f64 / decision.limit as f64
    };

    if ratio > 0.8 {
        base_delay_ms / 2
    } else if ratio > 0.5 {
        base_delay_ms
    } else if ratio > 0.2 {
        base_delay_ms.saturating_mul(2)
    } else {
        base_delay_ms.saturating_mul(4)
    }
}
