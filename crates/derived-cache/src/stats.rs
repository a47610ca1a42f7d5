//! Cache statistics tracking

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lock-free counters owned by a cache manager
///
/// `hits`, `misses` and `evictions` are lifetime counters; nothing resets them.
#[derive(Debug, Default)]
pub struct StatsTracker {
    /// Number of cache hits (memory or promoted from the store)
    hits: AtomicU64,
    /// Number of cache misses
    misses: AtomicU64,
    /// Number of entries evicted under capacity pressure
    evictions: AtomicU64,
    /// Number of entries expired by TTL
    expirations: AtomicU64,
    /// Hits served by promoting from the backing store
    persistence_hits: AtomicU64,
    /// Failed, timed-out or malformed backing store operations
    persistence_errors: AtomicU64,
    /// Number of `get` calls timed
    timed_accesses: AtomicU64,
    /// Sum of `get` durations in nanoseconds
    total_access_nanos: AtomicU64,
}

impl StatsTracker {
    /// Create new statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cache hit
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache miss
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an eviction
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a TTL expiration
    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a hit promoted from the backing store
    pub fn record_persistence_hit(&self) {
        self.persistence_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed backing store operation
    pub fn record_persistence_error(&self) {
        self.persistence_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold the duration of one `get` into the running average
    pub fn record_access_latency(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total_access_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.timed_accesses.fetch_add(1, Ordering::Relaxed);
    }

    /// Get hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get expiration count
    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Get persistence hit count
    pub fn persistence_hits(&self) -> u64 {
        self.persistence_hits.load(Ordering::Relaxed)
    }

    /// Get persistence error count
    pub fn persistence_errors(&self) -> u64 {
        self.persistence_errors.load(Ordering::Relaxed)
    }

    /// Running mean of `get` latency
    pub fn average_access_latency(&self) -> Duration {
        let count = self.timed_accesses.load(Ordering::Relaxed);
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.total_access_nanos.load(Ordering::Relaxed) / count)
    }

    /// Take a snapshot, combined with the manager's current occupancy
    pub fn snapshot(&self, entry_count: usize, size_bytes: usize) -> CacheStats {
        CacheStats {
            hits: self.hits(),
            misses: self.misses(),
            evictions: self.evictions(),
            expirations: self.expirations(),
            persistence_hits: self.persistence_hits(),
            persistence_errors: self.persistence_errors(),
            entry_count,
            size_bytes,
            average_access_latency: self.average_access_latency(),
        }
    }
}

/// Point-in-time view of a manager's statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub persistence_hits: u64,
    pub persistence_errors: u64,
    pub entry_count: usize,
    pub size_bytes: usize,
    pub average_access_latency: Duration,
}

impl CacheStats {
    /// Calculate hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits as f64;
        let total = hits + self.misses as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Get total requests (hits + misses)
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_stats_recording() {
        let stats = StatsTracker::new();

        stats.record_hit();
        stats.record_hit();
        stats.record_miss();

        let snapshot = stats.snapshot(0, 0);
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.total_requests(), 3);
    }

    #[test]
    fn test_hit_rate() {
        let stats = StatsTracker::new();

        // Empty stats should return 0.0
        assert_eq!(stats.snapshot(0, 0).hit_rate(), 0.0);

        for _ in 0..3 {
            stats.record_hit();
        }
        stats.record_miss();

        assert!((stats.snapshot(0, 0).hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_average_latency() {
        let stats = StatsTracker::new();
        assert_eq!(stats.average_access_latency(), Duration::ZERO);

        stats.record_access_latency(Duration::from_micros(10));
        stats.record_access_latency(Duration::from_micros(30));

        assert_eq!(stats.average_access_latency(), Duration::from_micros(20));
    }

    #[test]
    fn test_concurrent_counting() {
        let stats = Arc::new(StatsTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_hit();
                        stats.record_miss();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.hits(), 8000);
        assert_eq!(stats.misses(), 8000);
    }
}
