//! Read-through cache with a hash-sentinel coherence check.
//!
//! Every lookup costs one `get_code_hash` round-trip. The local entry is
//! served only when the remote hash is present and equal to the entry's
//! hash; otherwise the full record is fetched, passed through the caller's
//! transform, and stored over whatever was there.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use codekeep_core::{CodeKey, CodeObject, CodePayload, StoreResult};
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::entry::CacheEntry;
use super::read::CacheRead;
use crate::store::CodeStore;

/// Configuration for the read-through cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Remove the local entry once a full fetch confirms the record is gone.
    pub purge_on_absent: bool,
    /// Serialize lookups per key so concurrent misses populate only once.
    pub single_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            purge_on_absent: true,
            single_flight: false,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_purge_on_absent(mut self, enabled: bool) -> Self {
        self.purge_on_absent = enabled;
        self
    }

    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the local map after a matching hash check.
    pub hits: u64,
    /// Lookups that needed a full fetch.
    pub misses: u64,
    /// Entries built by the transform and stored.
    pub populations: u64,
    /// Entries removed because the record was confirmed absent.
    pub purges: u64,
    /// Number of entries currently in the local map.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    populations: AtomicU64,
    purges: AtomicU64,
}

struct Slot<E> {
    entry: Arc<E>,
    cached_at: DateTime<Utc>,
}

/// Read-through cache coordinator for code objects.
///
/// Owns its local map; two instances never share entries. All reads and
/// writes go through the wrapped [`CodeStore`].
///
/// # Example
///
/// ```ignore
/// let cache = CodeCache::new(Arc::new(store));
///
/// let compiled = cache
///     .get_code_by_cache("tenantA", "42", |code| Compiled::from(code))
///     .await?;
/// ```
pub struct CodeCache<S, E>
where
    S: CodeStore,
    E: CacheEntry,
{
    store: Arc<S>,
    entries: DashMap<CodeKey, Slot<E>>,
    key_locks: DashMap<CodeKey, Arc<Mutex<()>>>,
    config: CacheConfig,
    counters: Counters,
}

impl<S, E> CodeCache<S, E>
where
    S: CodeStore,
    E: CacheEntry,
{
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, CacheConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: CacheConfig) -> Self {
        Self {
            store,
            entries: DashMap::new(),
            key_locks: DashMap::new(),
            config,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            populations: self.counters.populations.load(Ordering::Relaxed),
            purges: self.counters.purges.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
        }
    }

    /// Get the cache entry for `(namespace, id)`, building it on a miss.
    ///
    /// A fresh hit returns the identical `Arc`. `Ok(None)` means the store
    /// holds no record. Store failures are returned as-is.
    pub async fn get_code_by_cache<F>(
        &self,
        namespace: &str,
        id: &str,
        transform: F,
    ) -> StoreResult<Option<Arc<E>>>
    where
        F: FnOnce(&CodeObject) -> E + Send,
    {
        let read = self.lookup(namespace, id, transform).await?;
        Ok(read.map(CacheRead::into_value))
    }

    /// Same as [`Self::get_code_by_cache`], with hit/miss metadata.
    pub async fn lookup<F>(
        &self,
        namespace: &str,
        id: &str,
        transform: F,
    ) -> StoreResult<Option<CacheRead<Arc<E>>>>
    where
        F: FnOnce(&CodeObject) -> E + Send,
    {
        let key = CodeKey::new(namespace, id);
        if !self.config.single_flight {
            return self.lookup_unguarded(key, transform).await;
        }

        let guard = self.key_lock(&key).lock_owned().await;
        let result = self.lookup_unguarded(key.clone(), transform).await;
        drop(guard);
        // Only the map still references the lock when no lookup holds or
        // awaits it.
        self.key_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn lookup_unguarded<F>(
        &self,
        key: CodeKey,
        transform: F,
    ) -> StoreResult<Option<CacheRead<Arc<E>>>>
    where
        F: FnOnce(&CodeObject) -> E + Send,
    {
        let (namespace, id) = (key.namespace(), key.id());

        // No fallback to the local entry when this fails.
        let remote_hash = self.store.get_code_hash(namespace, id).await?;

        if let Some(remote_hash) = remote_hash.as_deref() {
            if let Some(read) = self.fresh_hit(&key, remote_hash) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(namespace, code_id = id, "Serving code from cache");
                return Ok(Some(read));
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.populate(key, transform).await
    }

    fn fresh_hit(&self, key: &CodeKey, remote_hash: &str) -> Option<CacheRead<Arc<E>>> {
        let slot = self.entries.get(key)?;
        if slot.entry.hash() == remote_hash {
            Some(CacheRead::from_cache(
                Arc::clone(&slot.entry),
                slot.cached_at,
                remote_hash,
            ))
        } else {
            None
        }
    }

    async fn populate<F>(
        &self,
        key: CodeKey,
        transform: F,
    ) -> StoreResult<Option<CacheRead<Arc<E>>>>
    where
        F: FnOnce(&CodeObject) -> E + Send,
    {
        tracing::info!(
            namespace = key.namespace(),
            code_id = key.id(),
            "Fetching code from store to populate cache"
        );

        let Some(object) = self.store.get_code(key.namespace(), key.id()).await? else {
            if self.config.purge_on_absent && self.entries.remove(&key).is_some() {
                self.counters.purges.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    namespace = key.namespace(),
                    code_id = key.id(),
                    "Purged cache entry for absent code"
                );
            }
            return Ok(None);
        };

        let entry = Arc::new(transform(&object));
        if entry.hash() != object.hash {
            tracing::warn!(
                namespace = key.namespace(),
                code_id = key.id(),
                "Cache entry hash differs from stored hash; it will never be served as a hit"
            );
        }

        let cached_at = Utc::now();
        self.entries.insert(
            key,
            Slot {
                entry: Arc::clone(&entry),
                cached_at,
            },
        );
        self.counters.populations.fetch_add(1, Ordering::Relaxed);

        Ok(Some(CacheRead::from_store(entry, cached_at, object.hash)))
    }

    fn key_lock(&self, key: &CodeKey) -> Arc<Mutex<()>> {
        let lock = self
            .key_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Arc::clone(lock.value())
    }

    // ========================================================================
    // PASS-THROUGH OPERATIONS
    // ========================================================================

    /// Check that the store is reachable.
    pub async fn ping(&self) -> StoreResult<()> {
        self.store.ping().await
    }

    /// Write a record. The local map is left alone; the next lookup sees the
    /// new hash and repopulates.
    pub async fn put_code(
        &self,
        namespace: &str,
        id: &str,
        payload: &CodePayload,
    ) -> StoreResult<()> {
        self.store.put_code(namespace, id, payload).await
    }

    /// Full fetch, bypassing the local map.
    pub async fn get_code(&self, namespace: &str, id: &str) -> StoreResult<Option<CodeObject>> {
        self.store.get_code(namespace, id).await
    }

    /// Delete a record. The local entry is purged by the next lookup.
    pub async fn delete_code(&self, namespace: &str, id: &str) -> StoreResult<()> {
        self.store.delete_code(namespace, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCodeStore;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    struct Upper {
        compiled: String,
        hash: String,
    }

    impl CacheEntry for Upper {
        fn hash(&self) -> &str {
            &self.hash
        }
    }

    fn upper(object: &CodeObject) -> Upper {
        Upper {
            compiled: object.code.to_uppercase(),
            hash: object.hash.clone(),
        }
    }

    async fn seeded(
        code: &str,
        hash: &str,
    ) -> (Arc<InMemoryCodeStore>, CodeCache<InMemoryCodeStore, Upper>) {
        let store = Arc::new(InMemoryCodeStore::new());
        store
            .put_code("tenantA", "42", &CodePayload::new(code, hash))
            .await
            .unwrap();
        let cache = CodeCache::new(Arc::clone(&store));
        (store, cache)
    }

    #[tokio::test]
    async fn test_unknown_key_returns_none() {
        let store = Arc::new(InMemoryCodeStore::new());
        let cache: CodeCache<_, Upper> = CodeCache::new(store);

        let calls = AtomicUsize::new(0);
        let result = cache
            .get_code_by_cache("tenantA", "missing", |c| {
                calls.fetch_add(1, Ordering::SeqCst);
                upper(c)
            })
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.stats().entry_count, 0);
    }

    #[tokio::test]
    async fn test_fresh_hit_returns_same_entry_without_full_fetch() {
        let (store, cache) = seeded("print(1)", "h1").await;

        let first = cache.lookup("tenantA", "42", upper).await.unwrap().unwrap();
        assert!(first.was_cache_miss());
        assert_eq!(first.value().compiled, "PRINT(1)");

        let full_fetches = store.call_counts().full_fetches;
        let second = cache
            .lookup("tenantA", "42", |_| panic!("transform must not run on a fresh hit"))
            .await
            .unwrap()
            .unwrap();

        assert!(second.was_cache_hit());
        assert!(Arc::ptr_eq(first.value(), second.value()));
        assert_eq!(second.cached_at(), first.cached_at());
        assert_eq!(store.call_counts().full_fetches, full_fetches);
    }

    #[tokio::test]
    async fn test_new_hash_repopulates() {
        let (store, cache) = seeded("print(1)", "h1").await;
        let first = cache
            .get_code_by_cache("tenantA", "42", upper)
            .await
            .unwrap()
            .unwrap();

        store
            .put_code("tenantA", "42", &CodePayload::new("print(2)", "h2"))
            .await
            .unwrap();

        let second = cache
            .get_code_by_cache("tenantA", "42", upper)
            .await
            .unwrap()
            .unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.compiled, "PRINT(2)");
        assert_eq!(second.hash, "h2");
        assert_eq!(cache.stats().populations, 2);
    }

    #[tokio::test]
    async fn test_delete_purges_stale_entry() {
        let (store, cache) = seeded("print(1)", "h1").await;
        cache.get_code_by_cache("tenantA", "42", upper).await.unwrap();

        cache.delete_code("tenantA", "42").await.unwrap();

        assert!(cache.get_code("tenantA", "42").await.unwrap().is_none());
        assert!(cache
            .get_code_by_cache("tenantA", "42", upper)
            .await
            .unwrap()
            .is_none());

        let stats = cache.stats();
        assert_eq!(stats.purges, 1);
        assert_eq!(stats.entry_count, 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_purge_disabled_keeps_entry_but_returns_none() {
        let store = Arc::new(InMemoryCodeStore::new());
        store
            .put_code("tenantA", "42", &CodePayload::new("print(1)", "h1"))
            .await
            .unwrap();
        let cache: CodeCache<_, Upper> = CodeCache::with_config(
            Arc::clone(&store),
            CacheConfig::new().with_purge_on_absent(false),
        );
        cache.get_code_by_cache("tenantA", "42", upper).await.unwrap();

        store.delete_code("tenantA", "42").await.unwrap();
        assert!(cache
            .get_code_by_cache("tenantA", "42", upper)
            .await
            .unwrap()
            .is_none());
        assert_eq!(cache.stats().entry_count, 1);
        assert_eq!(cache.stats().purges, 0);

        // Record reappears with the same hash: the preserved entry is a hit.
        store
            .put_code("tenantA", "42", &CodePayload::new("print(1)", "h1"))
            .await
            .unwrap();
        let read = cache.lookup("tenantA", "42", upper).await.unwrap().unwrap();
        assert!(read.was_cache_hit());
    }

    #[tokio::test]
    async fn test_store_outage_fails_cached_lookup() {
        let (store, cache) = seeded("print(1)", "h1").await;
        cache.get_code_by_cache("tenantA", "42", upper).await.unwrap();

        store.set_online(false);
        let err = cache
            .get_code_by_cache("tenantA", "42", upper)
            .await
            .unwrap_err();
        assert!(err.is_connection_error());

        store.set_online(true);
        let read = cache.lookup("tenantA", "42", upper).await.unwrap().unwrap();
        assert!(read.was_cache_hit());
    }

    #[tokio::test]
    async fn test_instances_do_not_share_entries() {
        let (store, first) = seeded("print(1)", "h1").await;
        let second: CodeCache<_, Upper> = CodeCache::new(Arc::clone(&store));

        first.get_code_by_cache("tenantA", "42", upper).await.unwrap();
        let read = second.lookup("tenantA", "42", upper).await.unwrap().unwrap();

        assert!(read.was_cache_miss());
        assert_eq!(first.stats().populations, 1);
        assert_eq!(second.stats().populations, 1);
    }

    #[tokio::test]
    async fn test_mismatched_entry_hash_is_never_a_hit() {
        let (_store, cache) = seeded("print(1)", "h1").await;
        let wrong = |c: &CodeObject| Upper {
            compiled: c.code.clone(),
            hash: "other".to_string(),
        };

        cache.get_code_by_cache("tenantA", "42", wrong).await.unwrap();
        let read = cache.lookup("tenantA", "42", wrong).await.unwrap().unwrap();
        assert!(read.was_cache_miss());
        assert_eq!(cache.stats().hits, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_single_flight_populates_once() {
        let store = Arc::new(InMemoryCodeStore::new().with_latency(Duration::from_millis(20)));
        store
            .put_code("tenantA", "42", &CodePayload::new("print(1)", "h1"))
            .await
            .unwrap();
        let cache: Arc<CodeCache<_, Upper>> = Arc::new(CodeCache::with_config(
            Arc::clone(&store),
            CacheConfig::new().with_single_flight(true),
        ));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_code_by_cache("tenantA", "42", move |c| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        upper(c)
                    })
                    .await
                    .unwrap()
                    .unwrap()
            }));
        }

        let mut entries = Vec::new();
        for handle in handles {
            entries.push(handle.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(entries.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(cache.stats().hits, 3);
        assert!(cache.key_locks.is_empty());
    }

    #[tokio::test]
    async fn test_single_flight_releases_key_locks() {
        let store = Arc::new(InMemoryCodeStore::new());
        store
            .put_code("tenantA", "42", &CodePayload::new("print(1)", "h1"))
            .await
            .unwrap();
        let cache: CodeCache<_, Upper> = CodeCache::with_config(
            Arc::clone(&store),
            CacheConfig::new().with_single_flight(true),
        );

        cache.get_code_by_cache("tenantA", "42", upper).await.unwrap();
        for id in ["a", "b", "c"] {
            assert!(cache
                .get_code_by_cache("tenantA", id, upper)
                .await
                .unwrap()
                .is_none());
        }
        store.delete_code("tenantA", "42").await.unwrap();
        assert!(cache
            .get_code_by_cache("tenantA", "42", upper)
            .await
            .unwrap()
            .is_none());

        assert_eq!(cache.stats().purges, 1);
        assert!(cache.key_locks.is_empty());
    }

    #[tokio::test]
    async fn test_empty_code_and_hash_are_present_values() {
        let store = Arc::new(InMemoryCodeStore::new());
        store
            .put_code("tenantA", "empty-code", &CodePayload::new("", "h0"))
            .await
            .unwrap();
        store
            .put_code("tenantA", "empty-hash", &CodePayload::new("print(1)", ""))
            .await
            .unwrap();
        let cache: CodeCache<_, Upper> = CodeCache::new(Arc::clone(&store));

        let first = cache
            .lookup("tenantA", "empty-code", upper)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.value().compiled, "");
        assert!(first.was_cache_miss());
        let again = cache
            .lookup("tenantA", "empty-code", upper)
            .await
            .unwrap()
            .unwrap();
        assert!(again.was_cache_hit());

        let first = cache
            .lookup("tenantA", "empty-hash", upper)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.hash(), "");
        let again = cache
            .lookup("tenantA", "empty-hash", upper)
            .await
            .unwrap()
            .unwrap();
        assert!(again.was_cache_hit());
        assert_eq!(cache.stats().populations, 2);
    }

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new()
            .with_purge_on_absent(false)
            .with_single_flight(true);
        assert!(!config.purge_on_absent);
        assert!(config.single_flight);

        let default = CacheConfig::default();
        assert!(default.purge_on_absent);
        assert!(!default.single_flight);
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);
        assert!((CacheStats::default().hit_rate() - 0.0).abs() < 0.001);
    }
}
