use anyhow::Result;
use derived_cache::CacheConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store_dir: PathBuf,
    pub namespace: String,
    pub max_entries: usize,
    pub max_size_bytes: usize,
    pub default_ttl_secs: u64,
    pub store_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let defaults = CacheConfig::calculation_results();
        Self {
            store_dir: PathBuf::from(".dvc-cache"),
            namespace: defaults.namespace,
            max_entries: defaults.max_entries,
            max_size_bytes: defaults.max_size_bytes,
            default_ttl_secs: defaults.default_ttl.as_secs(),
            store_timeout_ms: defaults.store_timeout.as_millis() as u64,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Cache settings for a short-lived CLI process: persistent, no sweeper
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::default()
            .with_namespace(self.namespace.clone())
            .with_max_entries(self.max_entries)
            .with_max_size(self.max_size_bytes)
            .with_ttl(Duration::from_secs(self.default_ttl_secs))
            .with_cleanup_interval(Duration::ZERO)
            .with_persistence(true)
            .with_store_timeout(Duration::from_millis(self.store_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dvc.json");

        let config = Config {
            namespace: "templates".to_string(),
            default_ttl_secs: 60,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.namespace, "templates");
        assert_eq!(loaded.default_ttl_secs, 60);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dvc.json");
        std::fs::write(&path, r#"{"namespace": "quotes"}"#).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.namespace, "quotes");
        assert_eq!(loaded.max_entries, Config::default().max_entries);

        let cache = loaded.cache_config();
        assert!(cache.persist_enabled);
        assert!(cache.cleanup_interval.is_zero());
    }
}
