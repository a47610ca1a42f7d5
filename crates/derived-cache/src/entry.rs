//! Cache entry model and diagnostic views

use serde::Serialize;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

/// Size assumed for an entry whose value could not be encoded
pub const DEFAULT_ENTRY_SIZE: usize = 1024;

/// Entry stored in the memory index
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Key this entry is stored under
    pub key: String,
    /// Cached value
    pub value: V,
    /// When this entry was created
    pub created_at: SystemTime,
    /// Time-to-live measured from `created_at`
    pub ttl: Duration,
    /// Number of successful reads
    pub access_count: u64,
    /// Time of the last successful read (or creation)
    pub last_accessed_at: SystemTime,
    /// Approximate size in bytes, used for capacity accounting only
    pub estimated_size: usize,
}

impl<V> CacheEntry<V> {
    /// Create a fresh entry
    pub fn new(key: impl Into<String>, value: V, ttl: Duration, estimated_size: usize) -> Self {
        let now = SystemTime::now();
        Self::restored(key, value, now, ttl, estimated_size)
    }

    /// Rebuild an entry whose creation time is already known
    pub fn restored(
        key: impl Into<String>,
        value: V,
        created_at: SystemTime,
        ttl: Duration,
        estimated_size: usize,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            created_at,
            ttl,
            access_count: 0,
            last_accessed_at: SystemTime::now(),
            estimated_size,
        }
    }

    /// Check if this entry has expired at `now`
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        is_expired(self.created_at, self.ttl, now)
    }

    /// Check if this entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    /// Record a successful read
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed_at = SystemTime::now();
    }

    /// Diagnostic view without the value
    pub fn info(&self) -> EntryInfo {
        EntryInfo {
            key: self.key.clone(),
            created_at: self.created_at,
            ttl: self.ttl,
            access_count: self.access_count,
            last_accessed_at: self.last_accessed_at,
            estimated_size: self.estimated_size,
            expired: self.is_expired(),
        }
    }
}

/// Expiry rule shared by memory entries and persisted envelopes.
///
/// A creation time in the future (clock stepped back) counts as fresh.
pub fn is_expired(created_at: SystemTime, ttl: Duration, now: SystemTime) -> bool {
    match now.duration_since(created_at) {
        Ok(age) => age > ttl,
        Err(_) => false,
    }
}

/// Read-only description of a live entry, used for diagnostics and export
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub key: String,
    pub created_at: SystemTime,
    pub ttl: Duration,
    pub access_count: u64,
    pub last_accessed_at: SystemTime,
    pub estimated_size: usize,
    pub expired: bool,
}

/// Ordering for [`crate::CacheManager::entries`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    /// Most accessed first
    #[default]
    Access,
    /// Most recently accessed first
    Time,
    /// Largest first
    Size,
}

impl SortBy {
    /// Sort entries in place
    pub fn sort(self, entries: &mut [EntryInfo]) {
        match self {
            SortBy::Access => entries.sort_by(|a, b| {
                b.access_count
                    .cmp(&a.access_count)
                    .then_with(|| b.last_accessed_at.cmp(&a.last_accessed_at))
            }),
            SortBy::Time => entries.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at)),
            SortBy::Size => entries.sort_by(|a, b| b.estimated_size.cmp(&a.estimated_size)),
        }
    }
}

impl FromStr for SortBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "access" => Ok(SortBy::Access),
            "time" => Ok(SortBy::Time),
            "size" => Ok(SortBy::Size),
            other => Err(format!(
                "unknown sort order '{}', expected access, time or size",
                other
            )),
        }
    }
}
