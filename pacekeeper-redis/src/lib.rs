//! Redis remote store for `pacekeeper` (companion crate).
//!
//! Records are stored as JSON strings with a millisecond expiry (`PSETEX`), so every limiter
//! process pointed at the same Redis shares one set of counters. Pass the store to
//! [`RateLimiterBuilder::remote_store`](pacekeeper::RateLimiterBuilder::remote_store); the
//! limiter's circuit breaker and local fallback take over when Redis is unreachable.
//!
//! ```no_run
//! use pacekeeper::RateLimiter;
//! use pacekeeper_redis::RedisStore;
//!
//! # async fn run() -> Result<(), pacekeeper::StoreError> {
//! let store = RedisStore::connect("redis://127.0.0.1:6379").await?;
//! let limiter = RateLimiter::builder().remote_store(store).build().await;
//! # limiter.close().await;
//! # Ok(())
//! # }
//! ```

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use pacekeeper::{StateStore, StorageRecord, StoreError};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;

const BACKEND: &str = "redis";

/// [`StateStore`] backed by a Redis connection manager.
///
/// Clones share one manager. [`close`](StateStore::close) drops it for all of them, after which
/// every operation fails with [`StoreError::Unavailable`].
#[derive(Clone)]
pub struct RedisStore {
    conn: Arc<ArcSwapOption<ConnectionManager>>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("closed", &self.is_closed()).finish()
    }
}

fn unavailable(err: redis::RedisError) -> StoreError {
    StoreError::unavailable(BACKEND, err.to_string())
}

impl RedisStore {
    /// Open a managed connection to `url`.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] if the URL is invalid or the first connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        Self::from_client(client).await
    }

    /// Open a managed connection from an existing client.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] if the first connection fails.
    pub async fn from_client(client: redis::Client) -> Result<Self, StoreError> {
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;
        Ok(Self::from_manager(conn))
    }

    /// Wrap a connection manager the caller already owns.
    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn: Arc::new(ArcSwapOption::from_pointee(conn)) }
    }

    /// True once [`close`](StateStore::close) has dropped the connection manager.
    pub fn is_closed(&self) -> bool {
        self.conn.load().is_none()
    }

    fn connection(&self) -> Result<ConnectionManager, StoreError> {
        self.conn
            .load()
            .as_deref()
            .cloned()
            .ok_or_else(|| StoreError::unavailable(BACKEND, "connection closed"))
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<StorageRecord>, StoreError> {
        let mut conn = self.connection()?;
        let raw: Option<String> = conn.get(key).await.map_err(unavailable)?;
        raw.map(|raw| StorageRecord::from_json(key, &raw)).transpose()
    }

    async fn set(&self, key: &str, record: StorageRecord, ttl_ms: u64) -> Result<(), StoreError> {
        let value = record.to_json(key)?;
        let mut conn = self.connection()?;
        // PSETEX rejects a zero expiry.
        let _: () = conn.pset_ex(key, value, ttl_ms.max(1)).await.map_err(unavailable)?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await.map_err(unavailable)?;
        tracing::trace!(target: "pacekeeper::redis", %pong, "redis ping");
        Ok(())
    }

    async fn close(&self) {
        // The socket closes once in-flight commands drop their manager clones.
        if self.conn.swap(None).is_some() {
            tracing::debug!(target: "pacekeeper::redis", "released redis connection");
        }
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}
