use crate::circuit_breaker::{BackendBreaker, CircuitBreakerState, FailureOutcome};
use crate::error::StoreError;
use crate::store::{LocalStore, StateStore, StorageRecord};
use crate::telemetry::{BackendEvent, CircuitEvent, EventEmitter, LimiterEvent};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Storage façade used by the algorithms.
///
/// With a remote store configured and the breaker closed, every call goes to the remote store
/// under `timeout`. A failure or timeout is counted against the breaker and the same call is
/// served by the local store instead. Once the breaker opens, calls skip the remote store
/// entirely until [`FallbackStore::reconnected`] resets it.
///
/// Without a remote store this is a thin wrapper over the local store. So is a closed façade:
/// [`close`](StateStore::close) takes the remote handle out of every clone and drops it.
#[derive(Clone)]
pub struct FallbackStore {
    remote: Arc<ArcSwapOption<Arc<dyn StateStore>>>,
    remote_backend: Option<&'static str>,
    local: Arc<LocalStore>,
    breaker: BackendBreaker,
    timeout: Duration,
    emitter: EventEmitter,
}

impl fmt::Debug for FallbackStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackStore")
            .field("remote", &self.remote_backend)
            .field("released", &self.is_released())
            .field("local_entries", &self.local.len())
            .field("breaker", &self.breaker)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl FallbackStore {
    /// Build the façade.
    pub fn new(
        remote: Option<Arc<dyn StateStore>>,
        local: Arc<LocalStore>,
        breaker: BackendBreaker,
        timeout: Duration,
        emitter: EventEmitter,
    ) -> Self {
        let remote_backend = remote.as_ref().map(|r| r.backend_name());
        Self {
            remote: Arc::new(ArcSwapOption::from(remote.map(Arc::new))),
            remote_backend,
            local,
            breaker,
            timeout,
            emitter,
        }
    }

    /// The local store, shared with the Cleanup Scheduler.
    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    /// True when a remote store was configured, even if it has since been released.
    pub fn has_remote(&self) -> bool {
        self.remote_backend.is_some()
    }

    /// True once a configured remote store has been released by `close`.
    pub fn is_released(&self) -> bool {
        self.remote_backend.is_some() && self.remote.load().is_none()
    }

    /// Breaker snapshot.
    pub fn circuit_state(&self) -> CircuitBreakerState {
        self.breaker.state()
    }

    /// Name of the primary backend.
    pub fn primary_backend(&self) -> &'static str {
        self.remote_backend.unwrap_or("local")
    }

    fn routable_remote(&self) -> Option<Arc<Arc<dyn StateStore>>> {
        if self.breaker.is_open() {
            return None;
        }
        self.remote.load_full()
    }

    async fn bounded<T, F>(&self, backend: &'static str, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout { backend, timeout: self.timeout }),
        }
    }

    async fn on_remote_failure(&self, backend: &'static str, op: &'static str, err: &StoreError) {
        let outcome = self.breaker.record_failure();
        tracing::warn!(backend, op, error = %err, ?outcome, "remote store call failed; using local store");
        match outcome {
            FailureOutcome::Counted { consecutive_failures: 1 } => {
                self.emit_disconnected(backend, err).await;
            }
            FailureOutcome::Opened { consecutive_failures } => {
                if consecutive_failures == 1 {
                    self.emit_disconnected(backend, err).await;
                }
                self.emitter
                    .emit(LimiterEvent::Circuit(CircuitEvent::Opened {
                        failure_count: consecutive_failures,
                    }))
                    .await;
            }
            _ => {}
        }
    }

    async fn emit_disconnected(&self, backend: &'static str, err: &StoreError) {
        self.emitter
            .emit(LimiterEvent::Backend(BackendEvent::Disconnected {
                backend,
                error: err.to_string(),
            }))
            .await;
    }

    /// Ping the remote store, bounded by the timeout. Does not touch the breaker.
    pub async fn ping_remote(&self) -> Result<(), StoreError> {
        match self.remote.load_full() {
            Some(remote) => self.bounded(remote.backend_name(), remote.ping()).await,
            None => Ok(()),
        }
    }

    /// Startup connectivity check: emits Connected on success, otherwise counts the failure
    /// like any other remote failure.
    pub async fn check_connection(&self) {
        let Some(backend) = self.remote_backend else {
            return;
        };
        match self.ping_remote().await {
            Ok(()) => {
                tracing::info!(backend, "remote store connected");
                self.emitter.emit(LimiterEvent::Backend(BackendEvent::Connected { backend })).await;
            }
            Err(err) => self.on_remote_failure(backend, "ping", &err).await,
        }
    }

    /// Explicit reconnect success: close the breaker and announce it.
    ///
    /// Returns true if the breaker was open.
    pub async fn reconnected(&self) -> bool {
        let was_open = self.breaker.reset();
        if let Some(backend) = self.remote_backend {
            self.emitter.emit(LimiterEvent::Backend(BackendEvent::Connected { backend })).await;
        }
        if was_open {
            self.emitter.emit(LimiterEvent::Circuit(CircuitEvent::Closed)).await;
        }
        was_open
    }
}

#[async_trait]
impl StateStore for FallbackStore {
    async fn get(&self, key: &str) -> Result<Option<StorageRecord>, StoreError> {
        if let Some(remote) = self.routable_remote() {
            let backend = remote.backend_name();
            match self.bounded(backend, remote.get(key)).await {
                Ok(record) => {
                    self.breaker.record_success();
                    return Ok(record);
                }
                // the backend answered; a malformed value is not a connectivity failure
                Err(err) if err.is_codec() => {
                    self.breaker.record_success();
                    return Err(err);
                }
                Err(err) => self.on_remote_failure(backend, "get", &err).await,
            }
        }
        Ok(self.local.read(key))
    }

    async fn set(&self, key: &str, record: StorageRecord, ttl_ms: u64) -> Result<(), StoreError> {
        if let Some(remote) = self.routable_remote() {
            let backend = remote.backend_name();
            match self.bounded(backend, remote.set(key, record.clone(), ttl_ms)).await {
                Ok(()) => {
                    self.breaker.record_success();
                    return Ok(());
                }
                Err(err) => self.on_remote_failure(backend, "set", &err).await,
            }
        }
        self.local.write(key, record, ttl_ms);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.ping_remote().await
    }

    async fn close(&self) {
        if let Some(remote) = self.remote.swap(None) {
            remote.close().await;
            tracing::debug!(backend = remote.backend_name(), "remote store released");
        }
    }

    fn backend_name(&self) -> &'static str {
        self.primary_backend()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::WindowCount;
    use crate::telemetry::MemorySink;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct FlakyRemote {
        down: AtomicBool,
        calls: AtomicUsize,
        inner: std::sync::Mutex<std::collections::HashMap<String, StorageRecord>>,
    }

    #[async_trait]
    impl StateStore for FlakyRemote {
        async fn get(&self, key: &str) -> Result<Option<StorageRecord>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::unavailable("flaky", "connection refused"));
            }
            Ok(self.inner.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, record: StorageRecord, _ttl_ms: u64) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::unavailable("flaky", "connection refused"));
            }
            self.inner.lock().unwrap().insert(key.to_string(), record);
            Ok(())
        }

        async fn ping(&self) -> Result<(), StoreError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::unavailable("flaky", "connection refused"));
            }
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "flaky"
        }
    }

    fn record(count: u64) -> StorageRecord {
        StorageRecord::Window(WindowCount { count, expires_at_ms: 0 })
    }

    fn facade(remote: Arc<FlakyRemote>, threshold: usize) -> (FallbackStore, MemorySink) {
        let clock: Arc<dyn crate::clock::Clock> = Arc::new(ManualClock::new(0));
        let sink = MemorySink::new();
        let store = FallbackStore::new(
            Some(remote),
            Arc::new(LocalStore::new(clock.clone())),
            BackendBreaker::new(threshold).with_clock(clock),
            Duration::from_millis(50),
            EventEmitter::new(sink.clone()),
        );
        (store, sink)
    }

    #[tokio::test]
    async fn healthy_remote_serves_reads_and_writes() {
        let remote = Arc::new(FlakyRemote::default());
        let (store, _) = facade(remote.clone(), 3);
        store.set("k", record(2), 1_000).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(record(2)));
        assert!(store.local().is_empty());
        assert_eq!(store.backend_name(), "flaky");
    }

    #[tokio::test]
    async fn failures_fall_back_then_open_and_bypass() {
        let remote = Arc::new(FlakyRemote::default());
        remote.down.store(true, Ordering::SeqCst);
        let (store, sink) = facade(remote.clone(), 2);

        store.set("k", record(1), 1_000).await.unwrap();
        assert_eq!(store.local().read("k"), Some(record(1)), "write landed locally");
        assert!(!store.circuit_state().is_open);

        assert_eq!(store.get("k").await.unwrap(), Some(record(1)));
        assert!(store.circuit_state().is_open);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 2);

        for _ in 0..10 {
            store.get("k").await.unwrap();
        }
        assert_eq!(remote.calls.load(Ordering::SeqCst), 2, "open breaker skips the remote");

        let events = sink.events();
        assert!(matches!(events[0], LimiterEvent::Backend(BackendEvent::Disconnected { .. })));
        assert_eq!(events[1], LimiterEvent::Circuit(CircuitEvent::Opened { failure_count: 2 }));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn reconnect_restores_remote_routing() {
        let remote = Arc::new(FlakyRemote::default());
        remote.down.store(true, Ordering::SeqCst);
        let (store, sink) = facade(remote.clone(), 1);
        store.get("k").await.unwrap();
        assert!(store.circuit_state().is_open);

        remote.down.store(false, Ordering::SeqCst);
        assert!(store.ping_remote().await.is_ok());
        assert!(store.reconnected().await);
        assert_eq!(store.circuit_state().consecutive_failures, 0);

        store.set("k", record(5), 1_000).await.unwrap();
        assert_eq!(remote.inner.lock().unwrap().get("k"), Some(&record(5)));
        assert!(sink.events().contains(&LimiterEvent::Circuit(CircuitEvent::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_remote_times_out() {
        #[derive(Debug)]
        struct Stalled;

        #[async_trait]
        impl StateStore for Stalled {
            async fn get(&self, _key: &str) -> Result<Option<StorageRecord>, StoreError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(None)
            }
            async fn set(&self, _: &str, _: StorageRecord, _: u64) -> Result<(), StoreError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
            fn backend_name(&self) -> &'static str {
                "stalled"
            }
        }

        let clock: Arc<dyn crate::clock::Clock> = Arc::new(ManualClock::new(0));
        let local = Arc::new(LocalStore::new(clock.clone()));
        local.write("k", record(9), 1_000);
        let store = FallbackStore::new(
            Some(Arc::new(Stalled)),
            local,
            BackendBreaker::new(5),
            Duration::from_millis(50),
            EventEmitter::null(),
        );

        assert_eq!(store.get("k").await.unwrap(), Some(record(9)));
        assert_eq!(store.circuit_state().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn startup_check_emits_connected() {
        let remote = Arc::new(FlakyRemote::default());
        let (store, sink) = facade(remote, 3);
        store.check_connection().await;
        assert_eq!(
            sink.events(),
            vec![LimiterEvent::Backend(BackendEvent::Connected { backend: "flaky" })]
        );
    }

    #[tokio::test]
    async fn local_only_mode() {
        let clock: Arc<dyn crate::clock::Clock> = Arc::new(ManualClock::new(0));
        let store = FallbackStore::new(
            None,
            Arc::new(LocalStore::new(clock)),
            BackendBreaker::new(1),
            Duration::from_millis(50),
            EventEmitter::null(),
        );
        store.set("k", record(3), 1_000).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(record(3)));
        assert!(!store.has_remote());
        assert_eq!(store.backend_name(), "local");
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn closed_facade_stays_local() {
        let remote = Arc::new(FlakyRemote::default());
        let (store, _) = facade(remote.clone(), 3);
        store.close().await;
        store.set("k", record(1), 1_000).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(record(1)));
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.local().len(), 1);
    }

    #[tokio::test]
    async fn close_drops_the_remote_handle_from_every_clone() {
        let remote = Arc::new(FlakyRemote::default());
        let (store, _) = facade(remote.clone(), 3);
        let clone = store.clone();
        assert_eq!(Arc::strong_count(&remote), 2);

        clone.close().await;
        assert_eq!(Arc::strong_count(&remote), 1);
        assert!(store.is_released());
        assert!(store.has_remote());
        assert_eq!(store.primary_backend(), "flaky");
        assert!(store.ping_remote().await.is_ok());

        store.close().await;
        assert_eq!(Arc::strong_count(&remote), 1);
    }
}
