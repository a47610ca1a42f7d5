//! Specialized caches
//!
//! Thin facades over a [`CacheManager`] that fix a capacity/TTL policy and
//! derive keys from structured inputs. Callers produce values themselves on
//! a miss and hand them back with `cache_result`.

use crate::codec::ValueCodec;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::key::{CanonicalKeyDeriver, KeyDeriver};
use crate::manager::CacheManager;
use crate::store::BackingStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Cache keyed by a fingerprint of a structured input
pub struct DerivedCache<I: ?Sized, V, D = CanonicalKeyDeriver> {
    manager: Arc<CacheManager<V>>,
    deriver: D,
    _input: PhantomData<fn(&I)>,
}

/// Cache for computed calculation results
///
/// Same type as [`TemplateCache`]: the policy comes from the preset
/// constructor, so build it with [`DerivedCache::calculation_results`].
pub type ResultCache<I, V> = DerivedCache<I, V, CanonicalKeyDeriver>;

/// Cache for formatted output templates
///
/// Same type as [`ResultCache`]; build it with [`DerivedCache::templates`].
pub type TemplateCache<I, V> = DerivedCache<I, V, CanonicalKeyDeriver>;

/// Key prefix used by [`DerivedCache::calculation_results`]
pub const RESULT_KEY_PREFIX: &str = "calc";
/// Key prefix used by [`DerivedCache::templates`]
pub const TEMPLATE_KEY_PREFIX: &str = "tpl";

impl<I, V> DerivedCache<I, V, CanonicalKeyDeriver>
where
    I: Serialize + ?Sized,
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Calculation-result cache: large, high traffic, 30 minute TTL
    pub fn calculation_results(store: Option<Arc<dyn BackingStore>>) -> Self {
        Self::with_config(
            CacheConfig::calculation_results(),
            store,
            CanonicalKeyDeriver::new(RESULT_KEY_PREFIX),
        )
    }

    /// Template cache: small, read-mostly, 24 hour TTL
    pub fn templates(store: Option<Arc<dyn BackingStore>>) -> Self {
        Self::with_config(
            CacheConfig::templates(),
            store,
            CanonicalKeyDeriver::new(TEMPLATE_KEY_PREFIX),
        )
    }
}

impl<I, V, D> DerivedCache<I, V, D>
where
    I: ?Sized,
    V: Clone + Send + Sync + 'static,
    D: KeyDeriver<I>,
{
    /// Build a facade with its own manager
    pub fn with_config(
        config: CacheConfig,
        store: Option<Arc<dyn BackingStore>>,
        deriver: D,
    ) -> Self
    where
        V: Serialize + DeserializeOwned,
    {
        let manager = match store {
            Some(store) => CacheManager::with_store(config, store),
            None => CacheManager::new(config),
        };
        Self::from_manager(Arc::new(manager), deriver)
    }

    /// Build a facade with a custom value codec
    pub fn with_codec(
        config: CacheConfig,
        codec: Arc<dyn ValueCodec<V>>,
        store: Option<Arc<dyn BackingStore>>,
        deriver: D,
    ) -> Self {
        Self::from_manager(
            Arc::new(CacheManager::with_codec(config, codec, store)),
            deriver,
        )
    }

    /// Wrap an existing manager
    pub fn from_manager(manager: Arc<CacheManager<V>>, deriver: D) -> Self {
        Self {
            manager,
            deriver,
            _input: PhantomData,
        }
    }

    /// Key this input is cached under
    pub fn key_for(&self, input: &I) -> Result<String> {
        self.deriver.derive_key(input)
    }

    fn derive_or_log(&self, input: &I) -> Option<String> {
        match self.deriver.derive_key(input) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!(
                    "Cannot derive key for cache '{}': {}",
                    self.manager.config().namespace,
                    e
                );
                None
            }
        }
    }

    /// Store a value produced for `input` with the cache's default TTL
    pub fn cache_result(&self, input: &I, value: V) {
        if let Some(key) = self.derive_or_log(input) {
            self.manager.set(key, value);
        }
    }

    /// Store a value produced for `input` with an explicit TTL
    pub fn cache_result_with_ttl(&self, input: &I, value: V, ttl: Duration) {
        if let Some(key) = self.derive_or_log(input) {
            self.manager.set_with_ttl(key, value, ttl);
        }
    }

    /// Previously cached value for `input`, if any
    pub async fn get_cached(&self, input: &I) -> Option<V> {
        let key = self.derive_or_log(input)?;
        self.manager.get(&key).await
    }

    /// Drop the cached value for `input`
    pub async fn invalidate(&self, input: &I) -> bool {
        match self.derive_or_log(input) {
            Some(key) => self.manager.delete(&key).await,
            None => false,
        }
    }

    /// Underlying manager, for stats, cleanup and disposal
    pub fn manager(&self) -> &Arc<CacheManager<V>> {
        &self.manager
    }
}

impl<I: ?Sized, V, D> std::fmt::Debug for DerivedCache<I, V, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedCache")
            .field("manager", &self.manager)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct LoanInput {
        principal: f64,
        rate: f64,
        years: u32,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct LoanResult {
        monthly_payment: f64,
        total_interest: f64,
    }

    fn produce(input: &LoanInput) -> LoanResult {
        let total_interest = input.principal * input.rate * input.years as f64;
        LoanResult {
            monthly_payment: (input.principal + total_interest) / (12 * input.years) as f64,
            total_interest,
        }
    }

    #[tokio::test]
    async fn test_result_cache_miss_then_hit() {
        let cache: ResultCache<LoanInput, LoanResult> = ResultCache::calculation_results(None);
        let input = LoanInput {
            principal: 1200.0,
            rate: 0.05,
            years: 1,
        };

        assert_eq!(cache.get_cached(&input).await, None);
        let result = produce(&input);
        cache.cache_result(&input, result.clone());
        assert_eq!(cache.get_cached(&input).await, Some(result));

        let stats = cache.manager().stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        cache.manager().dispose().await;
    }

    #[tokio::test]
    async fn test_field_order_does_not_change_key() {
        let cache: ResultCache<serde_json::Value, i64> = ResultCache::calculation_results(None);

        cache.cache_result(&json!({"a": 1, "b": {"y": 2, "x": 3}}), 42);
        assert_eq!(
            cache.get_cached(&json!({"b": {"x": 3, "y": 2}, "a": 1})).await,
            Some(42)
        );
        cache.manager().dispose().await;
    }

    #[tokio::test]
    async fn test_template_cache_uses_its_own_namespace() {
        let store = Arc::new(MemoryStore::new());
        let shared: Arc<dyn BackingStore> = store.clone();
        let results: ResultCache<String, String> =
            ResultCache::calculation_results(Some(Arc::clone(&shared)));
        let templates: TemplateCache<String, String> = TemplateCache::templates(Some(shared));
        let input = "invoice".to_string();

        results.cache_result(&input, "42.00".to_string());
        templates.cache_result(&input, "Total: {amount}".to_string());
        results.manager().flush_persistence().await;
        templates.manager().flush_persistence().await;

        assert_eq!(results.manager().config().namespace, "results");
        assert_eq!(templates.manager().config().namespace, "templates");
        assert!(templates.manager().config().default_ttl > results.manager().config().default_ttl);

        let result_key = results.key_for(&input).unwrap();
        let template_key = templates.key_for(&input).unwrap();
        assert!(result_key.starts_with("calc:"));
        assert!(template_key.starts_with("tpl:"));
        assert!(store.contains_key(&format!("results:{}", result_key)));
        assert!(store.contains_key(&format!("templates:{}", template_key)));

        templates.manager().clear().await;
        assert_eq!(store.len(), 1);

        results.manager().dispose().await;
        templates.manager().dispose().await;
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache: ResultCache<LoanInput, LoanResult> = ResultCache::calculation_results(None);
        let input = LoanInput {
            principal: 500.0,
            rate: 0.1,
            years: 2,
        };

        cache.cache_result(&input, produce(&input));
        assert!(cache.invalidate(&input).await);
        assert!(!cache.invalidate(&input).await);
        assert_eq!(cache.get_cached(&input).await, None);
        cache.manager().dispose().await;
    }

    #[tokio::test]
    async fn test_unrepresentable_input_is_skipped() {
        use std::collections::HashMap;

        let cache: ResultCache<HashMap<(u8, u8), u8>, i64> =
            ResultCache::calculation_results(None);
        let mut input = HashMap::new();
        input.insert((1, 2), 3);

        cache.cache_result(&input, 1);
        assert_eq!(cache.get_cached(&input).await, None);
        assert!(cache.manager().is_empty());
        // Never reached the manager, so not a miss either
        assert_eq!(cache.manager().stats().misses, 0);
        cache.manager().dispose().await;
    }
}
