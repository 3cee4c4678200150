//! The public-facing limiter.
//!
//! [`RateLimiter`] owns the rule registry, the storage façade (and through it the circuit
//! breaker), and the background tasks. A caller registers rules once per domain, then calls
//! [`RateLimiter::check_limit`] before each costly remote operation and paces itself with
//! [`RateLimiter::calculate_delay`].
//!
//! ```rust
//! use pacekeeper::{RateLimiter, RuleConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), pacekeeper::LimiterError> {
//! let limiter = RateLimiter::builder().build().await;
//! let rule: RuleConfig = serde_json::from_value(serde_json::json!({
//!     "algorithm": "token-bucket",
//!     "tiers": [{ "name": "per-ip", "maxRequests": 2, "windowMs": 60000 }]
//! })).unwrap();
//! limiter.register_rules("shop.example", rule)?;
//!
//! assert!(limiter.check_limit("10.0.0.1", "shop.example").await.allowed);
//! assert!(limiter.check_limit("10.0.0.1", "shop.example").await.allowed);
//! let third = limiter.check_limit("10.0.0.1", "shop.example").await;
//! assert!(!third.allowed);
//! assert!(limiter.calculate_delay(&third, 500) >= 1_000);
//!
//! limiter.close().await;
//! # Ok(())
//! # }
//! ```

use crate::advisory;
use crate::circuit_breaker::{BackendBreaker, CircuitBreakerState};
use crate::clock::{Clock, SystemClock};
use crate::config::LimiterConfig;
use crate::decision::LimitDecision;
use crate::error::{LimiterError, RuleError};
use crate::rules::{RateLimitRule, RuleRegistry};
use crate::scheduler::{self, BackgroundTasks};
use crate::store::{CleanupReport, FallbackStore, LocalStore, StateStore, StorageKey};
use crate::strategies::strategy_for;
use crate::telemetry::{CheckEvent, EventEmitter, LifecycleEvent, LimiterEvent};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder {
    config: LimiterConfig,
    remote: Option<Arc<dyn StateStore>>,
    clock: Arc<dyn Clock>,
    emitter: EventEmitter,
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self {
            config: LimiterConfig::default(),
            remote: None,
            clock: Arc::new(SystemClock),
            emitter: EventEmitter::null(),
        }
    }
}

impl fmt::Debug for RateLimiterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiterBuilder")
            .field("config", &self.config)
            .field("remote", &self.remote.as_ref().map(|r| r.backend_name()))
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl RateLimiterBuilder {
    /// Use a validated configuration.
    pub fn config(mut self, config: LimiterConfig) -> Self {
        self.config = config;
        self
    }

    /// Share limits through a remote store. Without one the limiter runs local-only.
    pub fn remote_store<S>(self, store: S) -> Self
    where
        S: StateStore + 'static,
    {
        self.shared_remote_store(Arc::new(store))
    }

    /// Like [`remote_store`](Self::remote_store) for an already shared store.
    pub fn shared_remote_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.remote = Some(store);
        self
    }

    /// Override the clock (useful for deterministic tests).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Deliver limiter events to `sink`.
    pub fn sink<S>(mut self, sink: S) -> Self
    where
        S: tower::Service<LimiterEvent, Response = ()> + Clone + Send + 'static,
        S::Error: std::error::Error + Send + Sync + 'static,
        S::Future: Send + 'static,
    {
        self.emitter = EventEmitter::new(sink);
        self
    }

    /// Connect, start the background tasks, and announce readiness.
    ///
    /// Must be called from within a tokio runtime. A remote store that fails its startup ping
    /// is not fatal: the failure counts against the breaker and traffic falls back locally.
    pub async fn build(self) -> RateLimiter {
        let Self { config, remote, clock, emitter } = self;

        let local = Arc::new(LocalStore::new(Arc::clone(&clock)));
        let breaker = BackendBreaker::new(config.failure_threshold()).with_clock(Arc::clone(&clock));
        let store = FallbackStore::new(
            remote,
            local,
            breaker,
            config.backend_timeout(),
            emitter.clone(),
        );
        store.check_connection().await;

        let tasks = BackgroundTasks::spawn(
            store.clone(),
            config.cleanup_interval(),
            config.max_local_entries(),
            config.reconnect_interval(),
            emitter.clone(),
        );

        let backend = store.primary_backend();
        tracing::info!(backend, key_prefix = config.key_prefix(), "rate limiter initialized");
        emitter.emit(LimiterEvent::Lifecycle(LifecycleEvent::Initialized { backend })).await;

        RateLimiter {
            config,
            rules: RuleRegistry::new(),
            store,
            clock,
            emitter,
            tasks: Mutex::new(Some(tasks)),
            closed: AtomicBool::new(false),
        }
    }
}

/// Multi-tier rate limiter with remote/local storage and fail-open evaluation.
///
/// Share it across callers behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct RateLimiter {
    config: LimiterConfig,
    rules: RuleRegistry,
    store: FallbackStore,
    clock: Arc<dyn Clock>,
    emitter: EventEmitter,
    tasks: Mutex<Option<BackgroundTasks>>,
    closed: AtomicBool,
}

impl RateLimiter {
    /// Start building a limiter.
    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::default()
    }

    /// Active configuration.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Store or overwrite the rule for `domain`.
    ///
    /// Accepts a typed [`RateLimitRule`] or a deserialized
    /// [`RuleConfig`](crate::rules::RuleConfig). An unknown algorithm name or invalid tier
    /// is rejected here, never at check time.
    pub fn register_rules<R>(&self, domain: impl Into<String>, rule: R) -> Result<(), LimiterError>
    where
        R: TryInto<RateLimitRule>,
        LimiterError: From<R::Error>,
    {
        let domain = domain.into();
        let rule = rule.try_into()?;
        tracing::debug!(
            domain = %domain,
            algorithm = %rule.algorithm(),
            tiers = rule.tiers().len(),
            "registered rate limit rule"
        );
        self.rules.register(domain, rule);
        Ok(())
    }

    /// Rule registered for `domain`.
    pub fn rules_for(&self, domain: &str) -> Option<Arc<RateLimitRule>> {
        self.rules.get(domain)
    }

    /// Unregister `domain`. Returns true if a rule was removed.
    pub fn remove_rules(&self, domain: &str) -> bool {
        self.rules.remove(domain).is_some()
    }

    /// Domains with a registered rule, sorted.
    pub fn domains(&self) -> Vec<String> {
        self.rules.domains()
    }

    /// Decide whether `identifier` may make one more request to `domain`.
    ///
    /// Tiers are evaluated in order and the first denial is returned as is. When every tier
    /// admits, the decision with the smallest `remaining` wins, annotated with all per-tier
    /// results. Any error during evaluation (including an unregistered domain) yields a
    /// permissive fail-open decision and a [`CheckEvent::Failed`] event instead.
    pub async fn check_limit(&self, identifier: &str, domain: &str) -> LimitDecision {
        let now = self.clock.now_millis();
        match self.evaluate(identifier, domain, now).await {
            Ok(decision) => {
                tracing::trace!(
                    domain,
                    identifier,
                    allowed = decision.allowed,
                    remaining = decision.remaining,
                    tier = decision.tier.as_deref().unwrap_or(""),
                    "limit check"
                );
                decision
            }
            Err(err) => {
                tracing::warn!(domain, identifier, error = %err, "limit check failed; failing open");
                self.emitter
                    .emit(LimiterEvent::Check(CheckEvent::Failed {
                        domain: domain.to_string(),
                        identifier: identifier.to_string(),
                        error: err.to_string(),
                    }))
                    .await;
                let window = u64::try_from(self.config.fail_open_window().as_millis())
                    .unwrap_or(u64::MAX);
                LimitDecision::fail_open(now, window)
            }
        }
    }

    async fn evaluate(
        &self,
        identifier: &str,
        domain: &str,
        now: u64,
    ) -> Result<LimitDecision, LimiterError> {
        let rule = self
            .rules
            .get(domain)
            .ok_or_else(|| LimiterError::UnknownDomain(domain.to_string()))?;
        let strategy = strategy_for(rule.algorithm());

        let mut tier_results = Vec::with_capacity(rule.tiers().len());
        let mut tightest: Option<LimitDecision> = None;
        for tier in rule.tiers() {
            let key = StorageKey::new(self.config.key_prefix(), domain, tier.name(), identifier);
            let decision = strategy.evaluate(&self.store, &key, tier, now).await?;
            tier_results.push(decision.as_tier_result());
            if !decision.allowed {
                return Ok(LimitDecision { tier_results, ..decision });
            }
            if tightest.as_ref().map_or(true, |t| decision.remaining < t.remaining) {
                tightest = Some(decision);
            }
        }

        let mut decision = tightest.ok_or(RuleError::NoTiers)?;
        decision.tier_results = tier_results;
        Ok(decision)
    }

    /// Format `decision` as `X-RateLimit-*` headers.
    pub fn rate_limit_headers(&self, decision: &LimitDecision) -> BTreeMap<&'static str, String> {
        advisory::rate_limit_headers(decision)
    }

    /// Advisory delay before the next request; see [`advisory::calculate_delay`].
    pub fn calculate_delay(&self, decision: &LimitDecision, base_delay_ms: u64) -> u64 {
        advisory::calculate_delay(decision, base_delay_ms)
    }

    /// Breaker snapshot.
    pub fn circuit_state(&self) -> CircuitBreakerState {
        self.store.circuit_state()
    }

    /// Signal that the remote store is reachable again, closing the breaker.
    ///
    /// The reconnect task does this automatically; call it directly when the application
    /// learns about the reconnect first. Returns true if the breaker was open.
    pub async fn backend_reconnected(&self) -> bool {
        self.store.reconnected().await
    }

    /// Entries currently held by the local store.
    pub fn local_entries(&self) -> usize {
        self.store.local().len()
    }

    /// Run a cleanup pass now, outside the regular schedule.
    pub async fn sweep_now(&self) -> CleanupReport {
        scheduler::sweep_once(self.store.local(), self.config.max_local_entries(), &self.emitter)
            .await
    }

    /// True once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the background tasks, then release the remote store. Idempotent.
    ///
    /// Checks made after closing still work against the local store.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let tasks = self.tasks.lock().ok().and_then(|mut guard| guard.take());
        if let Some(mut tasks) = tasks {
            tasks.shutdown().await;
        }
        self.store.close().await;
        tracing::info!(backend = self.store.primary_backend(), "rate limiter closed");
        self.emitter.emit(LimiterEvent::Lifecycle(LifecycleEvent::Shutdown)).await;
    }
}
