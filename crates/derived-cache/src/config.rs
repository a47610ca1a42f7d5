//! Cache configuration options

use std::time::Duration;

/// Configuration for a cache manager
///
/// Supplied at construction and fixed for the lifetime of the manager.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum total estimated size of live entries in bytes
    pub max_size_bytes: usize,
    /// Maximum number of entries held in memory
    pub max_entries: usize,
    /// TTL applied by `set` when no explicit TTL is given
    pub default_ttl: Duration,
    /// Period of the background expiry sweep; zero disables the sweeper
    pub cleanup_interval: Duration,
    /// Whether entries are written through to the backing store
    pub persist_enabled: bool,
    /// Namespace used for keys in the backing store
    pub namespace: String,
    /// Upper bound on any single backing store call
    pub store_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 10 * 1024 * 1024, // 10 MB
            max_entries: 500,
            default_ttl: Duration::from_secs(300), // 5 minutes
            cleanup_interval: Duration::from_secs(60),
            persist_enabled: false,
            namespace: "default".to_string(),
            store_timeout: Duration::from_secs(2),
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration with custom capacity and TTL
    pub fn new(max_entries: usize, max_size_bytes: usize, ttl_secs: u64) -> Self {
        Self {
            max_entries,
            max_size_bytes,
            default_ttl: Duration::from_secs(ttl_secs),
            ..Default::default()
        }
    }

    /// Preset for calculation results: high traffic, large capacity
    pub fn calculation_results() -> Self {
        Self {
            max_size_bytes: 50 * 1024 * 1024, // 50 MB
            max_entries: 1000,
            default_ttl: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
            persist_enabled: true,
            namespace: "results".to_string(),
            ..Default::default()
        }
    }

    /// Preset for formatting templates: read-mostly, small, long-lived
    pub fn templates() -> Self {
        Self {
            max_size_bytes: 5 * 1024 * 1024, // 5 MB
            max_entries: 100,
            default_ttl: Duration::from_secs(24 * 60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
            persist_enabled: true,
            namespace: "templates".to_string(),
            ..Default::default()
        }
    }

    /// Set the maximum number of entries
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set the maximum total size
    pub fn with_max_size(mut self, max_size_bytes: usize) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    /// Set the default TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the sweep interval
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Enable or disable write-through persistence
    pub fn with_persistence(mut self, enabled: bool) -> Self {
        self.persist_enabled = enabled;
        self
    }

    /// Set the backing store namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the per-call backing store timeout
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_entries, 500);
        assert_eq!(config.max_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.default_ttl, Duration::from_secs(300));
        assert!(!config.persist_enabled);
    }

    #[test]
    fn test_presets() {
        let results = CacheConfig::calculation_results();
        let templates = CacheConfig::templates();

        assert!(results.max_entries > templates.max_entries);
        assert!(templates.default_ttl > results.default_ttl);
        assert_ne!(results.namespace, templates.namespace);
        assert!(results.persist_enabled && templates.persist_enabled);
    }

    #[test]
    fn test_builder_pattern() {
        let config = CacheConfig::default()
            .with_max_entries(2)
            .with_max_size(4096)
            .with_ttl(Duration::from_secs(1))
            .with_cleanup_interval(Duration::ZERO)
            .with_persistence(true)
            .with_namespace("calc");

        assert_eq!(config.max_entries, 2);
        assert_eq!(config.max_size_bytes, 4096);
        assert_eq!(config.default_ttl, Duration::from_secs(1));
        assert_eq!(config.cleanup_interval, Duration::ZERO);
        assert!(config.persist_enabled);
        assert_eq!(config.namespace, "calc");
    }
}
