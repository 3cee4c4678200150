//! Background maintenance: the Cleanup Scheduler and the reconnect task.
//!
//! Both run as tokio tasks independent of the request path. They share no lock with
//! `check_limit`; the sweep works shard by shard on the local store's concurrent map.

use crate::store::{CleanupReport, FallbackStore, LocalStore};
use crate::telemetry::{CleanupEvent, EventEmitter, LimiterEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Run one cleanup pass and report it.
pub async fn sweep_once(
    local: &LocalStore,
    max_entries: usize,
    emitter: &EventEmitter,
) -> CleanupReport {
    let report = local.sweep(max_entries);
    tracing::debug!(
        expired = report.expired,
        evicted = report.evicted,
        remaining = report.remaining,
        "local store sweep"
    );
    emitter
        .emit(LimiterEvent::Cleanup(CleanupEvent::Swept {
            expired: report.expired,
            evicted: report.evicted,
            remaining: report.remaining,
        }))
        .await;
    report
}

/// Handles to the running background tasks.
#[derive(Debug)]
pub struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Start the cleanup task, plus the reconnect task when a remote store is configured.
    pub fn spawn(
        store: FallbackStore,
        cleanup_interval: Duration,
        max_entries: usize,
        reconnect_interval: Duration,
        emitter: EventEmitter,
    ) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let mut handles = vec![tokio::spawn(cleanup_loop(
            Arc::clone(store.local()),
            cleanup_interval,
            max_entries,
            emitter,
            rx.clone(),
        ))];
        if store.has_remote() {
            handles.push(tokio::spawn(reconnect_loop(store, reconnect_interval, rx)));
        }
        Self { shutdown, handles }
    }

    /// Signal the tasks to stop and wait for them to finish their current iteration.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }

    /// Abort without waiting.
    pub fn abort(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn cleanup_loop(
    local: Arc<LocalStore>,
    period: Duration,
    max_entries: usize,
    emitter: EventEmitter,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                sweep_once(&local, max_entries, &emitter).await;
            }
        }
    }
    tracing::debug!("cleanup scheduler stopped");
}

async fn reconnect_loop(
    store: FallbackStore,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if !store.circuit_state().is_open {
                    continue;
                }
                match store.ping_remote().await {
                    Ok(()) => {
                        tracing::info!(backend = store.primary_backend(), "remote store reachable again");
                        store.reconnected().await;
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "reconnect ping failed");
                    }
                }
            }
        }
    }
    tracing::debug!("reconnect task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::BackendBreaker;
    use crate::clock::{Clock, ManualClock};
    use crate::store::{StorageRecord, WindowCount};
    use crate::telemetry::MemorySink;

    fn record() -> StorageRecord {
        StorageRecord::Window(WindowCount { count: 1, expires_at_ms: 0 })
    }

    #[tokio::test]
    async fn sweep_once_reports_and_emits() {
        let clock = ManualClock::new(0);
        let local = LocalStore::new(Arc::new(clock.clone()));
        local.write("old", record(), 10);
        local.write("fresh", record(), 10_000);
        clock.advance(100);
        let sink = MemorySink::new();

        let report = sweep_once(&local, 100, &EventEmitter::new(sink.clone())).await;
        assert_eq!(report, CleanupReport { expired: 1, evicted: 0, remaining: 1 });
        assert_eq!(
            sink.events(),
            vec![LimiterEvent::Cleanup(CleanupEvent::Swept { expired: 1, evicted: 0, remaining: 1 })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_runs_on_interval_and_stops_on_shutdown() {
        let clock = ManualClock::new(0);
        let dyn_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let local = Arc::new(LocalStore::new(dyn_clock.clone()));
        let sink = MemorySink::new();
        let emitter = EventEmitter::new(sink.clone());
        let store = FallbackStore::new(
            None,
            local.clone(),
            BackendBreaker::new(1),
            Duration::from_millis(50),
            emitter.clone(),
        );
        let mut tasks = BackgroundTasks::spawn(
            store,
            Duration::from_secs(60),
            10,
            Duration::from_secs(5),
            emitter,
        );

        local.write("k", record(), 1_000);
        clock.advance(5_000);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(local.len(), 1, "no sweep before the first interval");

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(local.len(), 0);
        assert_eq!(sink.len(), 1);

        tasks.shutdown().await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(sink.len(), 1, "no sweeps after shutdown");
    }
}
