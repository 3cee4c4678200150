//! Per-domain rule definitions and the registry that holds them.
//!
//! A domain (typically one upstream site) maps to exactly one [`RateLimitRule`]: an algorithm
//! plus an ordered list of [`Tier`]s. Tiers are evaluated in registration order.
//!
//! Rules can be built in code or deserialized from the JSON shape used by crawler configs:
//!
//! ```rust
//! use pacekeeper::rules::{Algorithm, RateLimitRule, RuleConfig};
//!
//! let config: RuleConfig = serde_json::from_str(r#"{
//!     "algorithm": "sliding-window-counter",
//!     "tiers": [
//!         { "name": "per-ip", "maxRequests": 30, "windowMs": 60000 },
//!         { "name": "per-credential", "maxRequests": 1000, "windowMs": 3600000 }
//!     ]
//! }"#).unwrap();
//! let rule = RateLimitRule::try_from(config).unwrap();
//! assert_eq!(rule.algorithm(), Algorithm::SlidingWindowCounter);
//! assert_eq!(rule.tiers()[0].name(), "per-ip");
//! ```

use crate::error::RuleError;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// The four interchangeable decision procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Continuous refill, burst up to capacity.
    TokenBucket,
    /// Epoch-aligned counter windows.
    FixedWindow,
    /// Exact log of timestamps in the trailing window.
    SlidingWindowLog,
    /// Weighted blend of the current and previous fixed windows.
    SlidingWindowCounter,
}

impl Algorithm {
    /// All supported algorithms.
    pub const ALL: [Algorithm; 4] = [
        Algorithm::TokenBucket,
        Algorithm::FixedWindow,
        Algorithm::SlidingWindowLog,
        Algorithm::SlidingWindowCounter,
    ];

    /// Configuration name, also used in headers.
    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "token-bucket",
            Algorithm::FixedWindow => "fixed-window",
            Algorithm::SlidingWindowLog => "sliding-window-log",
            Algorithm::SlidingWindowCounter => "sliding-window-counter",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Algorithm::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| RuleError::UnknownAlgorithm(s.to_string()))
    }
}

/// One independently enforced quota axis, e.g. `per-ip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier {
    name: String,
    max_requests: u64,
    window_ms: u64,
}

impl Tier {
    /// Create a validated tier. `max_requests` and `window_ms` must be > 0.
    pub fn new(
        name: impl Into<String>,
        max_requests: u64,
        window_ms: u64,
    ) -> Result<Self, RuleError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RuleError::EmptyTierName);
        }
        if max_requests == 0 {
            return Err(RuleError::ZeroMaxRequests { tier: name });
        }
        if window_ms == 0 {
            return Err(RuleError::ZeroWindow { tier: name });
        }
        Ok(Self { name, max_requests, window_ms })
    }

    /// Tier name, used as a StorageKey segment.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requests permitted per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Retention for records of this tier: two windows, so a previous-window read never
    /// races eviction.
    pub fn retention_ms(&self) -> u64 {
        self.window_ms.saturating_mul(2)
    }
}

/// Algorithm plus ordered tiers for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRule {
    algorithm: Algorithm,
    tiers: Vec<Tier>,
}

impl RateLimitRule {
    /// Create a rule. Needs at least one tier; tier names must be unique.
    pub fn new(algorithm: Algorithm, tiers: Vec<Tier>) -> Result<Self, RuleError> {
        if tiers.is_empty() {
            return Err(RuleError::NoTiers);
        }
        let mut seen = HashSet::with_capacity(tiers.len());
        for tier in &tiers {
            if !seen.insert(tier.name()) {
                return Err(RuleError::DuplicateTier(tier.name().to_string()));
            }
        }
        Ok(Self { algorithm, tiers })
    }

    /// Configured algorithm.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Tiers in evaluation order.
    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }
}

/// Serializable tier definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierConfig {
    /// Tier name.
    pub name: String,
    /// Requests permitted per window.
    pub max_requests: u64,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

/// Serializable rule definition; the algorithm is named, not typed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    /// One of `token-bucket`, `fixed-window`, `sliding-window-log`, `sliding-window-counter`.
    pub algorithm: String,
    /// Tiers in evaluation order.
    pub tiers: Vec<TierConfig>,
}

impl TryFrom<RuleConfig> for RateLimitRule {
    type Error = RuleError;

    fn try_from(config: RuleConfig) -> Result<Self, Self::Error> {
        let algorithm: Algorithm = config.algorithm.parse()?;
        let tiers = config
            .tiers
            .into_iter()
            .map(|t| Tier::new(t.name, t.max_requests, t.window_ms))
            .collect::<Result<Vec<_>, _>>()?;
        RateLimitRule::new(algorithm, tiers)
    }
}

impl From<&RateLimitRule> for RuleConfig {
    fn from(rule: &RateLimitRule) -> Self {
        Self {
            algorithm: rule.algorithm.as_str().to_string(),
            tiers: rule
                .tiers
                .iter()
                .map(|t| TierConfig {
                    name: t.name.clone(),
                    max_requests: t.max_requests,
                    window_ms: t.window_ms,
                })
                .collect(),
        }
    }
}

/// Domain → rule map with lock-free reads.
///
/// Registration swaps in a new map; readers on the hot path only load an `Arc`.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: ArcSwap<HashMap<String, Arc<RateLimitRule>>>,
}

impl RuleRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or overwrite the rule for `domain`.
    pub fn register(&self, domain: impl Into<String>, rule: RateLimitRule) {
        let domain = domain.into();
        let rule = Arc::new(rule);
        self.rules.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(domain.clone(), rule.clone());
            next
        });
    }

    /// Remove the rule for `domain`, returning it if present.
    pub fn remove(&self, domain: &str) -> Option<Arc<RateLimitRule>> {
        let mut removed = None;
        self.rules.rcu(|current| {
            let mut next = HashMap::clone(current);
            removed = next.remove(domain);
            next
        });
        removed
    }

    /// Rule for `domain`, if registered.
    pub fn get(&self, domain: &str) -> Option<Arc<RateLimitRule>> {
        self.rules.load().get(domain).cloned()
    }

    /// Registered domains, sorted.
    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.rules.load().keys().cloned().collect();
        domains.sort();
        domains
    }

    /// Number of registered domains.
    pub fn len(&self) -> usize {
        self.rules.load().len()
    }

    /// True when no domain is registered.
    pub fn is_empty(&self) -> bool {
        self.rules.load().is_empty()
    }
}
