//! The outcome of a limit check.

/// Outcome of one tier's evaluation, kept on the aggregate decision for observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierResult {
    /// Tier name.
    pub tier: String,
    /// Whether this tier admitted the request.
    pub allowed: bool,
    /// Requests this tier will still admit.
    pub remaining: u64,
    /// When this tier's quota is expected to be fully restored.
    pub reset_at_ms: u64,
}

/// Result of [`RateLimiter::check_limit`](crate::RateLimiter::check_limit).
///
/// Produced fresh on every check and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitDecision {
    /// Whether the caller may proceed.
    pub allowed: bool,
    /// Requests still admissible by the deciding tier.
    pub remaining: u64,
    /// Epoch milliseconds at which the deciding tier resets.
    pub reset_at_ms: u64,
    /// Seconds to wait before retrying. Only set on denials.
    pub retry_after_secs: Option<u64>,
    /// Algorithm that produced the decision, or `"fail-open"`.
    pub algorithm: &'static str,
    /// Name of the deciding tier, `None` for synthetic decisions.
    pub tier: Option<String>,
    /// `maxRequests` of the deciding tier.
    pub limit: u64,
    /// Per-tier outcomes in evaluation order, one per evaluated tier. Evaluation stops at the
    /// first denying tier. Empty for fail-open decisions.
    pub tier_results: Vec<TierResult>,
}

impl LimitDecision {
    /// Algorithm name carried by fail-open decisions.
    pub const FAIL_OPEN: &'static str = "fail-open";

    /// Permissive decision returned when evaluation itself failed.
    pub fn fail_open(now_ms: u64, window_ms: u64) -> Self {
        Self {
            allowed: true,
            remaining: 1,
            reset_at_ms: now_ms.saturating_add(window_ms),
            retry_after_secs: None,
            algorithm: Self::FAIL_OPEN,
            tier: None,
            limit: 1,
            tier_results: Vec::new(),
        }
    }

    /// True for decisions synthesized by the fail-open path.
    pub fn is_fail_open(&self) -> bool {
        self.algorithm == Self::FAIL_OPEN
    }

    /// Summarize this decision as one tier's entry.
    pub(crate) fn as_tier_result(&self) -> TierResult {
        TierResult {
            tier: self.tier.clone().unwrap_or_default(),
            allowed: self.allowed,
            remaining: self.remaining,
            reset_at_ms: self.reset_at_ms,
        }
    }
}
