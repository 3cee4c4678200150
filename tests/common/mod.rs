#![allow(dead_code)]

use async_trait::async_trait;
use pacekeeper::store::BucketState;
use pacekeeper::{StateStore, StorageRecord, StoreError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory remote store whose health can be flipped from the test.
#[derive(Debug, Default)]
pub struct ScriptedRemote {
    down: AtomicBool,
    malformed: AtomicBool,
    foreign: AtomicBool,
    closed: AtomicBool,
    calls: AtomicUsize,
    pings: AtomicUsize,
    records: Mutex<HashMap<String, StorageRecord>>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn down() -> Self {
        let remote = Self::default();
        remote.set_down(true);
        remote
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Every read returns an undecodable value.
    pub fn set_malformed(&self, malformed: bool) {
        self.malformed.store(malformed, Ordering::SeqCst);
    }

    /// Every read returns a well-formed token bucket, whatever the key.
    pub fn set_foreign(&self, foreign: bool) {
        self.foreign.store(foreign, Ordering::SeqCst);
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// get/set calls received, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    fn refuse(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("scripted", "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for ScriptedRemote {
    async fn get(&self, key: &str) -> Result<Option<StorageRecord>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.refuse()?;
        if self.malformed.load(Ordering::SeqCst) {
            return StorageRecord::from_json(key, "{\"kind\":\"window\",\"count\":\"lots\"}")
                .map(Some);
        }
        if self.foreign.load(Ordering::SeqCst) {
            return Ok(Some(StorageRecord::Bucket(BucketState {
                tokens: 0.0,
                last_refill_at_ms: 0,
                expires_at_ms: u64::MAX,
            })));
        }
        Ok(self.records.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, record: StorageRecord, _ttl_ms: u64) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.refuse()?;
        self.records.lock().unwrap().insert(key.to_string(), record);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.refuse()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}
