//! Storage for per-identifier limiter state.
//!
//! - [`StateStore`]: the get/set-with-expiry contract every backend satisfies.
//! - [`LocalStore`](local::LocalStore): in-process map, standalone or as the fallback.
//! - [`FallbackStore`](fallback::FallbackStore): the façade the algorithms talk to. It routes
//!   to an optional remote backend under circuit-breaker control and degrades to the local
//!   store when the remote misbehaves.
//!
//! Records are algorithm-specific and opaque to the orchestrator. They serialize to a tagged
//! JSON object so any shared key-value store holding strings can carry them.

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod fallback;
pub mod local;

pub use fallback::FallbackStore;
pub use local::{CleanupReport, LocalStore};

/// Token bucket state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    /// Tokens currently in the bucket, never negative.
    pub tokens: f64,
    /// When tokens were last added.
    pub last_refill_at_ms: u64,
    /// When the record may be discarded.
    pub expires_at_ms: u64,
}

/// Counter for one fixed window bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowCount {
    /// Requests admitted in the window.
    pub count: u64,
    /// When the record may be discarded.
    pub expires_at_ms: u64,
}

/// Ordered request timestamps within the trailing window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLog {
    /// Admission times, oldest first.
    pub timestamps: Vec<u64>,
    /// When the record may be discarded.
    pub expires_at_ms: u64,
}

/// A value held by a storage backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageRecord {
    /// Token bucket state.
    Bucket(BucketState),
    /// Fixed window or sliding window counter bucket.
    Window(WindowCount),
    /// Sliding window log.
    Log(RequestLog),
}

impl StorageRecord {
    /// Record kind, as written in the `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageRecord::Bucket(_) => "bucket",
            StorageRecord::Window(_) => "window",
            StorageRecord::Log(_) => "log",
        }
    }

    /// Expiry carried by the record itself.
    pub fn expires_at_ms(&self) -> u64 {
        match self {
            StorageRecord::Bucket(b) => b.expires_at_ms,
            StorageRecord::Window(w) => w.expires_at_ms,
            StorageRecord::Log(l) => l.expires_at_ms,
        }
    }

    /// Encode for a string-valued backend.
    pub fn to_json(&self, key: &str) -> Result<String, StoreError> {
        serde_json::to_string(self)
            .map_err(|e| StoreError::Codec { key: key.to_string(), message: e.to_string() })
    }

    /// Decode a value written by [`StorageRecord::to_json`].
    pub fn from_json(key: &str, raw: &str) -> Result<Self, StoreError> {
        serde_json::from_str(raw)
            .map_err(|e| StoreError::Codec { key: key.to_string(), message: e.to_string() })
    }
}

/// Deterministic address of one quota counter: `prefix:domain:tier:identifier`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    /// Compose a key from its segments.
    pub fn new(prefix: &str, domain: &str, tier: &str, identifier: &str) -> Self {
        Self(format!("{prefix}:{domain}:{tier}:{identifier}"))
    }

    /// Key for a window bucket starting at `window_start_ms`.
    pub fn window(&self, window_start_ms: u64) -> StorageKey {
        StorageKey(format!("{}:{}", self.0, window_start_ms))
    }

    /// Borrow the key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key-value store with per-key expiry.
///
/// Implementations do not need to be atomic across a get/set pair; the limiter performs a
/// best-effort read-modify-write.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch the record at `key`, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<StorageRecord>, StoreError>;

    /// Write `record` at `key`, expiring after `ttl_ms`.
    async fn set(&self, key: &str, record: StorageRecord, ttl_ms: u64) -> Result<(), StoreError>;

    /// Connectivity check used by the reconnect task.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Release connections. Called once by [`RateLimiter::close`](crate::RateLimiter::close).
    async fn close(&self) {}

    /// Backend name for logs and errors.
    fn backend_name(&self) -> &'static str;
}
