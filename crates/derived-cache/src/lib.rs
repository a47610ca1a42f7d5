//! Derived-Value Cache
//!
//! This crate caches the results of expensive-to-recompute operations, keyed
//! by a deterministic fingerprint of their inputs.
//!
//! # Features
//!
//! - **LRU Eviction**: Least recently used entries are evicted when the entry
//!   count or size budget is reached
//! - **TTL Support**: Entries expire lazily on access and via a background sweep
//! - **Durable Tier**: Optional write-through to a [`BackingStore`], read
//!   through on memory misses, so results survive restarts
//! - **Thread-Safe**: One `parking_lot` mutex per cache, atomic statistics
//! - **Statistics**: Hits, misses, evictions, expirations and access latency
//! - **Key Derivation**: Canonical, field-order independent fingerprints of
//!   serde-serializable inputs
//!
//! # Example
//!
//! ```ignore
//! use derived_cache::{CacheConfig, CacheManager, MemoryStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let cache = CacheManager::with_store(CacheConfig::default().with_persistence(true), store);
//!
//! // Check cache before computing
//! if let Some(result) = cache.get(&key).await {
//!     return Ok(result);
//! }
//!
//! // Compute and cache the result
//! let result = compute(&input)?;
//! cache.set(key, result.clone());
//! ```

pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod eviction;
pub mod key;
pub mod manager;
pub mod persistence;
pub mod specialized;
pub mod stats;
pub mod store;

pub use codec::{JsonCodec, Utf8Codec, ValueCodec};
pub use config::CacheConfig;
pub use entry::{CacheEntry, EntryInfo, SortBy, DEFAULT_ENTRY_SIZE};
pub use error::{CacheError, Result};
pub use eviction::LruIndex;
pub use key::{canonical_json, AHashKeyHasher, CanonicalKeyDeriver, KeyDeriver, KeyHasher};
pub use manager::CacheManager;
pub use persistence::{Loaded, PendingWrite, PersistenceTier};
pub use specialized::{DerivedCache, ResultCache, TemplateCache};
pub use stats::{CacheStats, StatsTracker};
pub use store::{BackingStore, FileStore, MemoryStore};
