#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # pacekeeper
//!
//! Adaptive, multi-tier rate limiting for request-issuing clients such as crawlers.
//!
//! ## Features
//!
//! - **Four algorithms**: token bucket, fixed window, sliding window log, and sliding window
//!   counter
//! - **Multi-tier rules** per domain (per-IP, per-credential, ...), evaluated in order with
//!   short-circuit on the first denial
//! - **Shared or local state**: an optional remote store (see the `pacekeeper-redis` crate)
//!   guarded by a circuit breaker, with an in-process fallback
//! - **Fail-open** evaluation: a broken limiter admits traffic instead of blocking it
//! - **Bounded memory**: a background sweep expires stale entries and evicts the least
//!   recently used ones over a capacity ceiling
//! - **Advisory pacing** and `X-RateLimit-*` headers derived from each decision
//! - **Typed events** delivered to tower-based telemetry sinks
//!
//! ## Quick Start
//!
//! ```rust
//! use pacekeeper::{Algorithm, RateLimitRule, RateLimiter, Tier};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pacekeeper::LimiterError> {
//!     let limiter = RateLimiter::builder().build().await;
//!     limiter.register_rules(
//!         "shop.example",
//!         RateLimitRule::new(
//!             Algorithm::SlidingWindowCounter,
//!             vec![Tier::new("per-ip", 30, 60_000)?, Tier::new("per-credential", 1_000, 3_600_000)?],
//!         )?,
//!     )?;
//!
//!     let decision = limiter.check_limit("203.0.113.9", "shop.example").await;
//!     if decision.allowed {
//!         let pause = limiter.calculate_delay(&decision, 1_000);
//!         println!("fetch, then wait {pause}ms");
//!     }
//!
//!     limiter.close().await;
//!     Ok(())
//! }
//! ```

pub mod advisory;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod decision;
pub mod error;
pub mod limiter;
pub mod middleware;
pub mod pacing;
pub mod rules;
pub mod scheduler;
pub mod store;
pub mod strategies;
pub mod telemetry;

// Re-exports
pub use advisory::{calculate_delay, rate_limit_headers, RateLimitHeaders};
pub use circuit_breaker::{BackendBreaker, CircuitBreakerState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LimiterConfig, LimiterConfigBuilder};
pub use decision::{LimitDecision, TierResult};
pub use error::{ConfigError, LimiterError, RuleError, StoreError, ThrottleError};
pub use limiter::{RateLimiter, RateLimiterBuilder};
pub use middleware::{RateLimitLayer, RateLimitService};
pub use pacing::{Pacer, RecordingSleeper, Sleeper, TokioSleeper};
pub use rules::{Algorithm, RateLimitRule, RuleConfig, RuleRegistry, Tier, TierConfig};
pub use store::{
    CleanupReport, FallbackStore, LocalStore, StateStore, StorageKey, StorageRecord,
};
pub use telemetry::{LimiterEvent, TelemetrySink};
