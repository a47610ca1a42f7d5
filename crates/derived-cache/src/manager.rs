//! Cache manager
//!
//! Owns the memory index, the LRU index, statistics and the optional
//! persistence tier. A single mutex guards index, LRU order and size
//! accounting; it is never held across an `.await`. Store writes are queued
//! while it is held, so the writer applies them in index order.

use crate::codec::{JsonCodec, ValueCodec};
use crate::config::CacheConfig;
use crate::entry::{CacheEntry, EntryInfo, SortBy, DEFAULT_ENTRY_SIZE};
use crate::eviction::LruIndex;
use crate::persistence::{Loaded, PersistedEntry, PersistenceTier};
use crate::stats::{CacheStats, StatsTracker};
use crate::store::BackingStore;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Memory tier state, guarded by the manager's lock
struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    lru: LruIndex,
    size_bytes: usize,
    /// Bumped on every change to the index so an in-flight read-through can
    /// tell that memory moved on while it waited on the store
    generation: u64,
}

enum Lookup<V> {
    Hit(V),
    Expired,
    Absent,
}

enum Promotion<V> {
    /// Entry was loaded from the store and inserted
    Promoted(V),
    /// Another caller filled the key while we were reading
    AlreadyPresent(V),
    /// The index changed while the store was being read
    Invalidated,
}

impl<V: Clone> CacheState<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruIndex::new(),
            size_bytes: 0,
            generation: 0,
        }
    }

    fn lookup(&mut self, key: &str, now: SystemTime) -> Lookup<V> {
        let expired = match self.entries.get(key) {
            None => return Lookup::Absent,
            Some(entry) => entry.is_expired_at(now),
        };
        if expired {
            self.remove(key);
            return Lookup::Expired;
        }

        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.touch();
                let value = entry.value.clone();
                self.lru.touch(key);
                Lookup::Hit(value)
            }
            None => Lookup::Absent,
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.generation += 1;
        self.lru.remove(key);
        self.size_bytes = self.size_bytes.saturating_sub(entry.estimated_size);
        Some(entry)
    }

    /// Evict from the LRU tail until `incoming` bytes and one more entry fit.
    ///
    /// Stops when the index is empty, so a single entry larger than
    /// `max_size_bytes` is still admitted.
    fn ensure_capacity(
        &mut self,
        incoming: usize,
        max_size_bytes: usize,
        max_entries: usize,
        evicted: &mut Vec<String>,
    ) {
        while self.size_bytes + incoming > max_size_bytes || self.entries.len() >= max_entries {
            let Some(victim) = self.lru.pop_lru() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&victim) {
                self.size_bytes = self.size_bytes.saturating_sub(entry.estimated_size);
            }
            self.generation += 1;
            evicted.push(victim);
        }
    }

    fn insert(&mut self, entry: CacheEntry<V>) {
        self.generation += 1;
        self.size_bytes += entry.estimated_size;
        self.lru.insert(&entry.key);
        self.entries.insert(entry.key.clone(), entry);
    }

    fn expired_keys(&self, now: SystemTime) -> Vec<String> {
        self.entries
            .values()
            .filter(|entry| entry.is_expired_at(now))
            .map(|entry| entry.key.clone())
            .collect()
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.entries = HashMap::new();
        self.lru.clear();
        self.size_bytes = 0;
    }
}

struct Inner<V> {
    config: CacheConfig,
    state: Mutex<CacheState<V>>,
    stats: Arc<StatsTracker>,
    codec: Arc<dyn ValueCodec<V>>,
    persistence: Option<PersistenceTier<V>>,
    disposed: AtomicBool,
}

impl<V: Clone + Send + Sync + 'static> Inner<V> {
    fn max_entries(&self) -> usize {
        self.config.max_entries.max(1)
    }

    fn lookup_memory(&self, key: &str) -> (Lookup<V>, u64) {
        let mut state = self.state.lock();
        let lookup = state.lookup(key, SystemTime::now());
        if matches!(lookup, Lookup::Expired) {
            self.forget_expired(key);
        }
        (lookup, state.generation)
    }

    /// Insert a value read from the store, unless memory changed since the
    /// read began at `epoch`
    fn promote(&self, key: &str, persisted: PersistedEntry<V>, epoch: u64) -> Promotion<V> {
        let mut state = self.state.lock();
        match state.lookup(key, SystemTime::now()) {
            Lookup::Hit(value) => return Promotion::AlreadyPresent(value),
            Lookup::Expired => {
                self.forget_expired(key);
                return Promotion::Invalidated;
            }
            Lookup::Absent => {}
        }
        if state.generation != epoch {
            return Promotion::Invalidated;
        }

        let size = persisted.encoded_size;
        let mut evicted = Vec::new();
        state.ensure_capacity(
            size,
            self.config.max_size_bytes,
            self.max_entries(),
            &mut evicted,
        );
        self.forget_evicted(&evicted);

        let value = persisted.value.clone();
        let mut entry = CacheEntry::restored(
            key,
            persisted.value,
            persisted.created_at,
            persisted.ttl,
            size,
        );
        entry.touch();
        state.insert(entry);
        Promotion::Promoted(value)
    }

    /// Drop a stale envelope, unless a newer write may have been queued
    /// since the read began at `epoch`
    fn drop_stale(&self, key: &str, epoch: u64) {
        let state = self.state.lock();
        if state.generation == epoch {
            if let Some(tier) = &self.persistence {
                tier.remove(key);
            }
        }
    }

    // The helpers below queue store writes and must run under the state lock
    // so the writer sees them in index order.

    /// Count evictions and drop the victims from the backing store
    fn forget_evicted(&self, evicted: &[String]) {
        for key in evicted {
            self.stats.record_eviction();
            tracing::debug!("Evicted '{}' from cache '{}'", key, self.config.namespace);
            if let Some(tier) = &self.persistence {
                tier.remove(key);
            }
        }
    }

    /// Count an expiry; the memory copy was the latest write, so the stored
    /// one is stale too
    fn forget_expired(&self, key: &str) {
        self.stats.record_expiration();
        if let Some(tier) = &self.persistence {
            tier.remove(key);
        }
    }

    fn sweep(&self) -> usize {
        let now = SystemTime::now();
        let removed = {
            let mut state = self.state.lock();
            let expired = state.expired_keys(now);
            for key in &expired {
                state.remove(key);
                self.forget_expired(key);
            }
            expired.len()
        };

        if removed > 0 {
            tracing::debug!(
                "Swept {} expired entries from cache '{}'",
                removed,
                self.config.namespace
            );
        }
        removed
    }
}

/// Background expiry sweep owned by a manager
struct Sweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    fn spawn<V: Clone + Send + Sync + 'static>(inner: Weak<Inner<V>>, period: Duration) -> Self {
        let (shutdown, mut signal) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match inner.upgrade() {
                            Some(inner) => {
                                inner.sweep();
                            }
                            None => break,
                        }
                    }
                    changed = signal.changed() => {
                        if changed.is_err() || *signal.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        Self { shutdown, handle }
    }
}

/// Thread-safe, multi-tier cache with TTL and LRU eviction
///
/// Construct inside a Tokio runtime. Call [`CacheManager::dispose`] when
/// done; every other method panics afterwards.
pub struct CacheManager<V> {
    inner: Arc<Inner<V>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<V> CacheManager<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Memory-only cache using the JSON codec for size estimation
    pub fn new(config: CacheConfig) -> Self {
        Self::with_codec(config, Arc::new(JsonCodec::new()), None)
    }

    /// Cache backed by `store`, using the JSON codec
    pub fn with_store(config: CacheConfig, store: Arc<dyn BackingStore>) -> Self {
        Self::with_codec(config, Arc::new(JsonCodec::new()), Some(store))
    }
}

impl<V> CacheManager<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Cache with an explicit codec and optional backing store
    pub fn with_codec(
        config: CacheConfig,
        codec: Arc<dyn ValueCodec<V>>,
        store: Option<Arc<dyn BackingStore>>,
    ) -> Self {
        let stats = Arc::new(StatsTracker::new());

        let persistence = match (config.persist_enabled, store) {
            (true, Some(store)) => Some(PersistenceTier::new(
                store,
                Arc::clone(&codec),
                config.namespace.clone(),
                config.store_timeout,
                Arc::clone(&stats),
            )),
            (true, None) => {
                tracing::warn!(
                    "Cache '{}' has persistence enabled but no backing store; running memory-only",
                    config.namespace
                );
                None
            }
            (false, _) => None,
        };

        let inner = Arc::new(Inner {
            config,
            state: Mutex::new(CacheState::new()),
            stats,
            codec,
            persistence,
            disposed: AtomicBool::new(false),
        });

        let sweeper = if inner.config.cleanup_interval.is_zero() {
            None
        } else {
            Some(Sweeper::spawn(
                Arc::downgrade(&inner),
                inner.config.cleanup_interval,
            ))
        };

        tracing::info!(
            "Created cache '{}' (max_entries={}, max_size_bytes={}, ttl={:?}, persistent={})",
            inner.config.namespace,
            inner.config.max_entries,
            inner.config.max_size_bytes,
            inner.config.default_ttl,
            inner.persistence.is_some()
        );

        Self {
            inner,
            sweeper: Mutex::new(sweeper),
        }
    }

    fn assert_live(&self) {
        assert!(
            !self.inner.disposed.load(Ordering::Acquire),
            "cache '{}' used after dispose",
            self.inner.config.namespace
        );
    }

    /// Look up a key, reading through to the backing store on a memory miss
    pub async fn get(&self, key: &str) -> Option<V> {
        self.assert_live();
        let start = Instant::now();
        let value = self.lookup(key).await;
        self.inner.stats.record_access_latency(start.elapsed());
        value
    }

    async fn lookup(&self, key: &str) -> Option<V> {
        let inner = &self.inner;

        let (lookup, epoch) = inner.lookup_memory(key);
        match lookup {
            Lookup::Hit(value) => {
                inner.stats.record_hit();
                return Some(value);
            }
            Lookup::Expired => {
                inner.stats.record_miss();
                return None;
            }
            Lookup::Absent => {}
        }

        if let Some(tier) = &inner.persistence {
            match tier.load(key).await {
                Loaded::Entry(persisted) => match inner.promote(key, persisted, epoch) {
                    Promotion::Promoted(value) => {
                        inner.stats.record_hit();
                        inner.stats.record_persistence_hit();
                        tracing::debug!(
                            "Promoted '{}' from backing store into cache '{}'",
                            key,
                            inner.config.namespace
                        );
                        return Some(value);
                    }
                    Promotion::AlreadyPresent(value) => {
                        inner.stats.record_hit();
                        return Some(value);
                    }
                    Promotion::Invalidated => {}
                },
                Loaded::Stale => inner.drop_stale(key, epoch),
                Loaded::Missing => {}
            }
        }

        inner.stats.record_miss();
        None
    }

    /// Insert a value with the default TTL
    pub fn set(&self, key: impl Into<String>, value: V) {
        let ttl = self.inner.config.default_ttl;
        self.set_with_ttl(key, value, ttl);
    }

    /// Insert or fully replace a value.
    ///
    /// Never fails: persistence problems are logged and the memory tier
    /// stays authoritative.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.assert_live();
        let inner = &self.inner;
        let key = key.into();

        let encoded = match inner.codec.encode(&value) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::debug!(
                    "Could not encode '{}' with {} codec, assuming {} bytes: {}",
                    key,
                    inner.codec.name(),
                    DEFAULT_ENTRY_SIZE,
                    e
                );
                None
            }
        };
        let size = encoded.as_ref().map_or(DEFAULT_ENTRY_SIZE, Vec::len);

        let entry = CacheEntry::new(key.clone(), value, ttl, size);
        let created_at = entry.created_at;

        let mut state = inner.state.lock();
        state.remove(&key);
        let mut evicted = Vec::new();
        state.ensure_capacity(
            size,
            inner.config.max_size_bytes,
            inner.max_entries(),
            &mut evicted,
        );
        state.insert(entry);
        inner.forget_evicted(&evicted);

        if let Some(tier) = &inner.persistence {
            match encoded {
                Some(bytes) => tier.write(&key, &bytes, created_at, ttl),
                None => tracing::warn!(
                    "Skipping write-through of '{}' to cache '{}': value could not be encoded",
                    key,
                    inner.config.namespace
                ),
            }
        }
    }

    /// Remove a key from memory and the backing store.
    ///
    /// Returns whether the key was present in memory.
    pub async fn delete(&self, key: &str) -> bool {
        self.assert_live();
        let (existed, pending) = {
            let mut state = self.inner.state.lock();
            // Absent keys may still have a read-through in flight
            state.generation += 1;
            let existed = state.remove(key).is_some();
            let pending = self.inner.persistence.as_ref().map(|tier| tier.delete(key));
            (existed, pending)
        };
        if let Some(pending) = pending {
            pending.wait().await;
        }
        existed
    }

    /// Remove every entry from memory and the backing store namespace.
    ///
    /// Hit, miss and eviction counters are kept.
    pub async fn clear(&self) {
        self.assert_live();
        let pending = {
            let mut state = self.inner.state.lock();
            state.reset();
            self.inner.persistence.as_ref().map(|tier| tier.clear())
        };
        if let Some(pending) = pending {
            pending.wait().await;
        }
    }

    /// Remove all expired entries, returning how many were removed
    pub fn cleanup(&self) -> usize {
        self.assert_live();
        self.inner.sweep()
    }

    /// Wait until queued write-throughs have reached the backing store
    pub async fn flush_persistence(&self) {
        self.assert_live();
        if let Some(tier) = &self.inner.persistence {
            tier.flush().await;
        }
    }

    /// Snapshot of the statistics
    pub fn stats(&self) -> CacheStats {
        self.assert_live();
        let (count, size) = {
            let state = self.inner.state.lock();
            (state.entries.len(), state.size_bytes)
        };
        self.inner.stats.snapshot(count, size)
    }

    /// Describe live entries in the requested order
    pub fn entries(&self, sort_by: SortBy) -> Vec<EntryInfo> {
        self.assert_live();
        let mut entries: Vec<EntryInfo> = {
            let state = self.inner.state.lock();
            state.entries.values().map(CacheEntry::info).collect()
        };
        sort_by.sort(&mut entries);
        entries
    }

    /// Keys from most to least recently used
    pub fn keys_by_recency(&self) -> Vec<String> {
        self.assert_live();
        let state = self.inner.state.lock();
        state.lru.keys().map(str::to_string).collect()
    }

    /// Whether a live entry exists in memory; does not count as an access
    pub fn contains_key(&self, key: &str) -> bool {
        self.assert_live();
        let state = self.inner.state.lock();
        state
            .entries
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    /// Number of entries in memory
    pub fn len(&self) -> usize {
        self.assert_live();
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total estimated size of entries in memory
    pub fn size_bytes(&self) -> usize {
        self.assert_live();
        self.inner.state.lock().size_bytes
    }

    /// Whether a persistence tier is attached
    pub fn is_persistent(&self) -> bool {
        self.inner.persistence.is_some()
    }

    /// Get the cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Stop the sweeper, release the memory index and close the
    /// persistence writer.
    ///
    /// Returns once the sweeper has exited. Writes already queued still
    /// reach the store; nothing new is flushed. Calling it again is a no-op.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.shutdown.send(true);
            if let Err(e) = sweeper.handle.await {
                tracing::warn!(
                    "Sweeper for cache '{}' ended abnormally: {}",
                    self.inner.config.namespace,
                    e
                );
            }
        }

        self.inner.state.lock().reset();
        if let Some(tier) = &self.inner.persistence {
            tier.close();
        }

        tracing::info!("Disposed cache '{}'", self.inner.config.namespace);
    }
}

impl<V> Drop for CacheManager<V> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.handle.abort();
        }
    }
}

impl<V> std::fmt::Debug for CacheManager<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (entries, size) = {
            let state = self.inner.state.lock();
            (state.entries.len(), state.size_bytes)
        };
        f.debug_struct("CacheManager")
            .field("namespace", &self.inner.config.namespace)
            .field("max_entries", &self.inner.config.max_entries)
            .field("max_size_bytes", &self.inner.config.max_size_bytes)
            .field("default_ttl", &self.inner.config.default_ttl)
            .field("current_entries", &entries)
            .field("size_bytes", &size)
            .field("persistence", &self.inner.persistence)
            .field("disposed", &self.inner.disposed.load(Ordering::Relaxed))
            .finish()
    }
}
