use crate::clock::Clock;
use crate::error::StoreError;
use crate::store::{StateStore, StorageRecord};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// One entry of the [`LocalStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct LocalStoreEntry {
    /// Stored record.
    pub value: StorageRecord,
    /// Entries with `expires_at_ms < now` are dead.
    pub expires_at_ms: u64,
    /// Last read or write, for least-recently-used eviction.
    pub last_access_at_ms: u64,
}

impl LocalStoreEntry {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at_ms < now
    }
}

/// Outcome of one [`LocalStore::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Entries dropped because they expired.
    pub expired: usize,
    /// Entries dropped to get back under the capacity ceiling.
    pub evicted: usize,
    /// Entries left after the sweep.
    pub remaining: usize,
}

impl CleanupReport {
    /// Total entries removed.
    pub fn removed(&self) -> usize {
        self.expired + self.evicted
    }
}

/// In-process record store.
///
/// Backed by a sharded concurrent map, so a sweep only ever locks one shard at a time.
/// Only [`sweep`](LocalStore::sweep) deletes entries; reads of an expired entry report it as
/// absent and leave removal to the sweep.
#[derive(Debug)]
pub struct LocalStore {
    entries: DashMap<String, LocalStoreEntry>,
    clock: Arc<dyn Clock>,
}

impl LocalStore {
    /// Create an empty store reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { entries: DashMap::new(), clock }
    }

    /// Number of entries, expired ones included until the next sweep.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot an entry without touching its access time.
    pub fn entry(&self, key: &str) -> Option<LocalStoreEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Read an entry, refreshing its access time.
    pub fn read(&self, key: &str) -> Option<StorageRecord> {
        let now = self.clock.now_millis();
        let mut entry = self.entries.get_mut(key)?;
        if entry.is_expired(now) {
            return None;
        }
        entry.last_access_at_ms = now;
        Some(entry.value.clone())
    }

    /// Write an entry that expires `ttl_ms` from now.
    pub fn write(&self, key: &str, record: StorageRecord, ttl_ms: u64) {
        let now = self.clock.now_millis();
        self.entries.insert(
            key.to_string(),
            LocalStoreEntry {
                value: record,
                expires_at_ms: now.saturating_add(ttl_ms),
                last_access_at_ms: now,
            },
        );
    }

    /// Drop expired entries, then evict least-recently-used entries until at most
    /// `max_entries` remain.
    pub fn sweep(&self, max_entries: usize) -> CleanupReport {
        let now = self.clock.now_millis();
        let mut expired = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                expired += 1;
            }
            keep
        });

        let mut evicted = 0;
        let len = self.entries.len();
        if len > max_entries {
            let mut by_age: Vec<(String, u64)> = self
                .entries
                .iter()
                .map(|e| (e.key().clone(), e.value().last_access_at_ms))
                .collect();
            by_age.sort_unstable_by_key(|(_, last_access)| *last_access);
            for (key, _) in by_age.into_iter().take(len - max_entries) {
                if self.entries.remove(&key).is_some() {
                    evicted += 1;
                }
            }
        }

        CleanupReport { expired, evicted, remaining: self.entries.len() }
    }
}

#[async_trait]
impl StateStore for LocalStore {
    async fn get(&self, key: &str) -> Result<Option<StorageRecord>, StoreError> {
        Ok(self.read(key))
    }

    async fn set(&self, key: &str, record: StorageRecord, ttl_ms: u64) -> Result<(), StoreError> {
        self.write(key, record, ttl_ms);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::WindowCount;

    fn record(count: u64) -> StorageRecord {
        StorageRecord::Window(WindowCount { count, expires_at_ms: 0 })
    }

    fn store() -> (LocalStore, ManualClock) {
        let clock = ManualClock::new(1_000);
        (LocalStore::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn write_then_read() {
        let (store, _) = store();
        store.write("a", record(1), 500);
        assert_eq!(store.read("a"), Some(record(1)));
        let entry = store.entry("a").unwrap();
        assert_eq!(entry.expires_at_ms, 1_500);
        assert_eq!(entry.last_access_at_ms, 1_000);
    }

    #[test]
    fn expired_entries_read_as_absent_until_swept() {
        let (store, clock) = store();
        store.write("a", record(1), 100);
        clock.advance(100);
        assert!(store.read("a").is_some(), "expiry is exclusive");
        clock.advance(1);
        assert!(store.read("a").is_none());
        assert_eq!(store.len(), 1);
        let report = store.sweep(10);
        assert_eq!(report, CleanupReport { expired: 1, evicted: 0, remaining: 0 });
    }

    #[test]
    fn reads_refresh_access_time() {
        let (store, clock) = store();
        store.write("a", record(1), 10_000);
        clock.advance(50);
        store.read("a");
        assert_eq!(store.entry("a").unwrap().last_access_at_ms, 1_050);
    }

    #[test]
    fn sweep_evicts_least_recently_used_down_to_ceiling() {
        let (store, clock) = store();
        for key in ["a", "b", "c", "d"] {
            store.write(key, record(1), 60_000);
            clock.advance(10);
        }
        // touch "a" so "b" becomes the oldest
        store.read("a");

        let report = store.sweep(2);
        assert_eq!(report, CleanupReport { expired: 0, evicted: 2, remaining: 2 });
        assert!(store.entry("b").is_none());
        assert!(store.entry("c").is_none());
        assert!(store.entry("a").is_some());
        assert!(store.entry("d").is_some());
        assert_eq!(report.removed(), 2);
    }

    #[test]
    fn sweep_expires_before_evicting() {
        let (store, clock) = store();
        store.write("short", record(1), 10);
        store.write("long-1", record(1), 60_000);
        store.write("long-2", record(1), 60_000);
        clock.advance(20);
        let report = store.sweep(2);
        assert_eq!(report, CleanupReport { expired: 1, evicted: 0, remaining: 2 });
    }

    #[tokio::test]
    async fn implements_state_store() {
        let (store, _) = store();
        store.set("k", record(7), 1_000).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(record(7)));
        assert_eq!(store.get("missing").await.unwrap(), None);
        assert_eq!(store.backend_name(), "local");
    }
}
