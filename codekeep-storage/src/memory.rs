//! In-memory code store.
//!
//! Behaves like the Redis store for a single process: records live in a
//! concurrent map keyed by [`CodeKey`]. It can be switched offline to
//! exercise connection-failure paths, can simulate network latency, and
//! counts the fetches it serves.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use codekeep_core::{CodeKey, CodeObject, CodePayload, StoreError, StoreResult};
use dashmap::DashMap;

use crate::store::CodeStore;

/// Counters of the calls served by an [`InMemoryCodeStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCallCounts {
    pub pings: u64,
    pub puts: u64,
    pub full_fetches: u64,
    pub hash_fetches: u64,
    pub deletes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    pings: AtomicU64,
    puts: AtomicU64,
    full_fetches: AtomicU64,
    hash_fetches: AtomicU64,
    deletes: AtomicU64,
}

/// In-memory [`CodeStore`].
#[derive(Debug)]
pub struct InMemoryCodeStore {
    records: DashMap<CodeKey, CodePayload>,
    online: AtomicBool,
    latency: Option<Duration>,
    counters: Counters,
}

impl Default for InMemoryCodeStore {
    fn default() -> Self {
        Self {
            records: DashMap::new(),
            online: AtomicBool::new(true),
            latency: None,
            counters: Counters::default(),
        }
    }
}

impl InMemoryCodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` before touching the records.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Simulate losing (`false`) or regaining (`true`) connectivity.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn call_counts(&self) -> StoreCallCounts {
        StoreCallCounts {
            pings: self.counters.pings.load(Ordering::Relaxed),
            puts: self.counters.puts.load(Ordering::Relaxed),
            full_fetches: self.counters.full_fetches.load(Ordering::Relaxed),
            hash_fetches: self.counters.hash_fetches.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
        }
    }

    async fn enter(&self, counter: &AtomicU64) -> StoreResult<()> {
        counter.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.is_online() {
            Ok(())
        } else {
            Err(StoreError::connection("in-memory store is offline"))
        }
    }
}

#[async_trait]
impl CodeStore for InMemoryCodeStore {
    async fn ping(&self) -> StoreResult<()> {
        self.enter(&self.counters.pings).await
    }

    async fn put_code(
        &self,
        namespace: &str,
        id: &str,
        payload: &CodePayload,
    ) -> StoreResult<()> {
        self.enter(&self.counters.puts).await?;
        self.records
            .insert(CodeKey::new(namespace, id), payload.clone());
        Ok(())
    }

    async fn get_code(&self, namespace: &str, id: &str) -> StoreResult<Option<CodeObject>> {
        self.enter(&self.counters.full_fetches).await?;
        let key = CodeKey::new(namespace, id);
        let payload = self.records.get(&key).map(|entry| entry.value().clone());
        Ok(payload.map(|payload| CodeObject::from_payload(&key, payload)))
    }

    async fn get_code_hash(&self, namespace: &str, id: &str) -> StoreResult<Option<String>> {
        self.enter(&self.counters.hash_fetches).await?;
        let key = CodeKey::new(namespace, id);
        Ok(self.records.get(&key).map(|entry| entry.value().hash.clone()))
    }

    async fn delete_code(&self, namespace: &str, id: &str) -> StoreResult<()> {
        self.enter(&self.counters.deletes).await?;
        self.records.remove(&CodeKey::new(namespace, id));
        Ok(())
    }
}
