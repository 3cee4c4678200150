//! Error types for the limiter, its configuration, and its storage backends
use crate::decision::LimitDecision;
use std::time::Duration;
use thiserror::Error;

/// Invalid [`LimiterConfig`](crate::LimiterConfig) values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The storage key prefix must be non-empty.
    #[error("key_prefix must not be empty")]
    EmptyKeyPrefix,
    /// Failure threshold must be > 0.
    #[error("failure_threshold must be > 0 (got {provided})")]
    InvalidFailureThreshold {
        /// Value provided by caller.
        provided: usize,
    },
    /// A periodic interval or timeout was zero.
    #[error("{field} must be > 0 (got {value:?})")]
    ZeroDuration {
        /// Name of the offending field.
        field: &'static str,
        /// Value provided by caller.
        value: Duration,
    },
    /// Local store capacity must be > 0.
    #[error("max_local_entries must be > 0 (got {provided})")]
    InvalidCapacity {
        /// Value provided by caller.
        provided: usize,
    },
}

/// Invalid rule definitions, raised at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// The algorithm name is not one of the four supported strategies.
    #[error("unknown rate limit algorithm '{0}'")]
    UnknownAlgorithm(String),
    /// A rule needs at least one tier.
    #[error("rule has no tiers")]
    NoTiers,
    /// Tier names must be non-empty.
    #[error("tier name must not be empty")]
    EmptyTierName,
    /// Tier names must be unique within a rule.
    #[error("duplicate tier '{0}'")]
    DuplicateTier(String),
    /// `max_requests` must be > 0.
    #[error("tier '{tier}': max_requests must be > 0")]
    ZeroMaxRequests {
        /// Offending tier.
        tier: String,
    },
    /// `window_ms` must be > 0.
    #[error("tier '{tier}': window_ms must be > 0")]
    ZeroWindow {
        /// Offending tier.
        tier: String,
    },
}

/// Failures reported by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backend could not be reached or rejected the command.
    #[error("{backend} unavailable: {message}")]
    Unavailable {
        /// Backend name, e.g. `"redis"`.
        backend: &'static str,
        /// Backend-provided detail.
        message: String,
    },
    /// The call did not finish within the configured bound.
    #[error("{backend} call timed out after {timeout:?}")]
    Timeout {
        /// Backend name.
        backend: &'static str,
        /// Bound that was exceeded.
        timeout: Duration,
    },
    /// A stored value could not be encoded or decoded.
    #[error("stored value for '{key}' is malformed: {message}")]
    Codec {
        /// Storage key.
        key: String,
        /// Decoder detail.
        message: String,
    },
}

impl StoreError {
    /// Shorthand for [`StoreError::Unavailable`].
    pub fn unavailable(backend: &'static str, message: impl Into<String>) -> Self {
        StoreError::Unavailable { backend, message: message.into() }
    }

    /// Check if this error came from the timeout bound.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout { .. })
    }

    /// Check if the backend answered but the value was unusable.
    pub fn is_codec(&self) -> bool {
        matches!(self, StoreError::Codec { .. })
    }
}

/// Errors surfaced by limiter operations.
///
/// `check_limit` never returns these; it converts them into a fail-open decision.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LimiterError {
    /// Invalid limiter configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Invalid rule definition.
    #[error(transparent)]
    Rule(#[from] RuleError),
    /// Storage failure not absorbed by the fallback path.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// No rule is registered for the domain.
    #[error("no rate limit rules registered for domain '{0}'")]
    UnknownDomain(String),
    /// The stored record does not have the shape the algorithm expects.
    #[error("record at '{key}' is not a {expected} record")]
    UnexpectedRecord {
        /// Storage key.
        key: String,
        /// Record kind the algorithm needed.
        expected: &'static str,
    },
}

impl From<std::convert::Infallible> for LimiterError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

/// Errors produced by [`RateLimitService`](crate::middleware::RateLimitService).
#[derive(Debug, Clone, Error)]
pub enum ThrottleError<E> {
    /// The limiter denied the request.
    #[error("rate limited; retry after {retry_after:?}")]
    RateLimited {
        /// How long the caller should wait before retrying.
        retry_after: Duration,
        /// The denying decision, for headers or logging.
        decision: Box<LimitDecision>,
    },
    /// The wrapped service failed.
    #[error("{0}")]
    Inner(#[source] E),
}

impl<E> ThrottleError<E> {
    /// Check if this error is a rate limit denial.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Advisory wait for a denial.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}
