//! In-memory cache with per-key TTL and incremental housekeeping

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rand::Rng;
use tracing::{debug, trace};

use crate::domain::cache::{
    now_millis, Cache, CacheEntry, CacheSettings, Jitter, KeyPattern, KeyStream, SetOptions,
};
use crate::domain::DomainError;

/// Configuration for in-memory cache
#[derive(Debug, Clone)]
pub struct InMemoryCacheConfig {
    /// Key prefix for namespacing
    pub key_prefix: String,
    /// Default TTL for entries written without one
    pub default_ttl: Option<Duration>,
    /// Default jitter applied to TTLs
    pub default_jitter: Jitter,
    /// Soft capacity of this namespace; exceeding it triggers random eviction
    pub max_items: Option<usize>,
    /// Entries visited per housekeeping tick
    pub housekeeping_batch_size: usize,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            default_ttl: None,
            default_jitter: Jitter::default(),
            max_items: Some(10_000),
            housekeeping_batch_size: 1_000,
        }
    }
}

impl InMemoryCacheConfig {
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn with_default_jitter(mut self, jitter: impl Into<Jitter>) -> Self {
        self.default_jitter = jitter.into();
        self
    }

    /// Sets the maximum number of items before eviction kicks in
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }

    /// Disables capacity-based eviction
    pub fn unbounded(mut self) -> Self {
        self.max_items = None;
        self
    }

    pub fn with_housekeeping_batch_size(mut self, size: usize) -> Self {
        self.housekeeping_batch_size = size.max(1);
        self
    }
}

/// Map shared by a cache and all of its children
struct Store<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
}

impl<V> Store<V> {
    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, CacheEntry<V>>>, DomainError> {
        self.entries
            .read()
            .map_err(|e| DomainError::cache(format!("Failed to acquire read lock: {}", e)))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, CacheEntry<V>>>, DomainError> {
        self.entries
            .write()
            .map_err(|e| DomainError::cache(format!("Failed to acquire write lock: {}", e)))
    }
}

/// Process-local cache over a shared map
///
/// Expired entries are hidden on read and removed by a housekeeping pass that
/// every `set` schedules on the runtime. A pass visits the table in bounded
/// batches, yielding between them, and evicts random live entries while the
/// namespace is over `max_items`. Eviction is approximate: each visited entry
/// is dropped with probability `count / max_items - 1`.
///
/// Clones share the table and the housekeeping flag.
pub struct InMemoryCache<V> {
    store: Arc<Store<V>>,
    settings: CacheSettings,
    max_items: Option<usize>,
    batch_size: usize,
    pending: Arc<AtomicBool>,
}

impl<V> Clone for InMemoryCache<V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            settings: self.settings.clone(),
            max_items: self.max_items,
            batch_size: self.batch_size,
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<V> fmt::Debug for InMemoryCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCache")
            .field("settings", &self.settings)
            .field("max_items", &self.max_items)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl<V> InMemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a new in-memory cache with default configuration
    pub fn new() -> Self {
        Self::with_config(InMemoryCacheConfig::default())
    }

    /// Creates a new in-memory cache with the given configuration
    pub fn with_config(config: InMemoryCacheConfig) -> Self {
        let settings = CacheSettings::new(config.key_prefix)
            .with_default_ttl(config.default_ttl)
            .with_default_jitter(config.default_jitter);

        Self {
            store: Arc::new(Store {
                entries: RwLock::new(HashMap::new()),
            }),
            settings,
            max_items: config.max_items,
            batch_size: config.housekeeping_batch_size.max(1),
            pending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of live entries in this namespace
    pub fn len(&self) -> usize {
        let now = now_millis();
        self.store
            .read()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(k, e)| k.starts_with(&self.settings.key_prefix) && !e.is_expired_at(now))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs one full housekeeping pass now
    pub async fn run_housekeeping(&self) {
        Self::housekeep(
            self.store.clone(),
            self.settings.key_prefix.clone(),
            self.max_items,
            self.batch_size,
        )
        .await;
    }

    fn schedule_housekeeping(&self) {
        // A pass that has not started yet will see this write too.
        if self.pending.swap(true, Ordering::AcqRel) {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.pending.store(false, Ordering::Release);
            trace!("No runtime available, skipping housekeeping");
            return;
        };

        let store = self.store.clone();
        let prefix = self.settings.key_prefix.clone();
        let pending = self.pending.clone();
        let max_items = self.max_items;
        let batch_size = self.batch_size;

        handle.spawn(async move {
            pending.store(false, Ordering::Release);
            Self::housekeep(store, prefix, max_items, batch_size).await;
        });
    }

    async fn housekeep(
        store: Arc<Store<V>>,
        prefix: String,
        max_items: Option<usize>,
        batch_size: usize,
    ) {
        // The namespace size is taken once per pass and tracked through
        // removals; writes racing the pass make it approximate.
        let (snapshot, mut count) = match store.read() {
            Ok(entries) => {
                let keys: Vec<String> = entries.keys().cloned().collect();
                let count = keys.iter().filter(|k| k.starts_with(&prefix)).count();
                (keys, count)
            }
            Err(_) => return,
        };

        let mut expired = 0usize;
        let mut evicted = 0usize;

        for batch in snapshot.chunks(batch_size) {
            {
                let Ok(mut entries) = store.write() else {
                    return;
                };
                let now = now_millis();
                let mut rng = rand::thread_rng();

                for key in batch {
                    let Some(entry) = entries.get(key) else {
                        continue;
                    };

                    if entry.is_expired_at(now) {
                        entries.remove(key);
                        expired += 1;
                        if key.starts_with(&prefix) {
                            count = count.saturating_sub(1);
                        }
                        continue;
                    }

                    let Some(max) = max_items else {
                        continue;
                    };
                    if !key.starts_with(&prefix) || count <= max {
                        continue;
                    }

                    let probability = eviction_probability(count, max);
                    if rng.gen_bool(probability) {
                        entries.remove(key);
                        evicted += 1;
                        count -= 1;
                    }
                }
            }

            tokio::task::yield_now().await;
        }

        if expired > 0 || evicted > 0 {
            debug!(
                prefix = %prefix,
                expired,
                evicted,
                scanned = snapshot.len(),
                "In-memory cache housekeeping finished"
            );
        }
    }

    fn live_keys(&self, filter: impl Fn(&str) -> bool) -> Result<Vec<String>, DomainError> {
        let now = now_millis();
        let entries = self.store.read()?;

        Ok(entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .filter_map(|(key, _)| self.settings.strip_prefix(key))
            .filter(|key| filter(key))
            .map(|key| key.to_string())
            .collect())
    }

    /// Removes fully-qualified keys in batches, yielding between batches
    async fn remove_batched(&self, keys: Vec<String>) -> Result<(), DomainError> {
        for batch in keys.chunks(self.batch_size) {
            {
                let mut entries = self.store.write()?;
                for key in batch {
                    entries.remove(key);
                }
            }
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}

/// Probability of evicting a visited entry when `count` entries share a
/// namespace capped at `max_items`
pub fn eviction_probability(count: usize, max_items: usize) -> f64 {
    if max_items == 0 {
        return 1.0;
    }
    (count as f64 / max_items as f64 - 1.0).clamp(0.0, 1.0)
}

impl<V> Default for InMemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> Cache for InMemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Value = V;

    fn key_prefix(&self) -> &str {
        &self.settings.key_prefix
    }

    async fn get(&self, key: &str) -> Result<Option<V>, DomainError> {
        let full_key = self.settings.full_key(key);
        let now = now_millis();

        {
            let entries = self.store.read()?;
            match entries.get(&full_key) {
                Some(entry) if !entry.is_expired_at(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        let mut entries = self.store.write()?;
        if entries.get(&full_key).is_some_and(|e| e.is_expired_at(now)) {
            entries.remove(&full_key);
            trace!(key = %full_key, "Removed expired entry on read");
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: V, options: SetOptions) -> Result<(), DomainError> {
        let entry = CacheEntry::new(value, self.settings.expires_at(&options));

        self.store.write()?.insert(self.settings.full_key(key), entry);
        self.schedule_housekeeping();
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DomainError> {
        self.store.write()?.remove(&self.settings.full_key(key));
        Ok(())
    }

    fn keys<'a>(&'a self, prefix: Option<&'a str>) -> KeyStream<'a> {
        let prefix = prefix.unwrap_or("");
        match self.live_keys(|key| key.starts_with(prefix)) {
            Ok(keys) => futures::stream::iter(keys.into_iter().map(Ok)).boxed(),
            Err(e) => futures::stream::once(async move { Err::<String, _>(e) }).boxed(),
        }
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<(), DomainError> {
        let scope = self.settings.full_key(prefix.unwrap_or(""));

        if scope.is_empty() {
            self.store.write()?.clear();
            return Ok(());
        }

        let keys: Vec<String> = self
            .store
            .read()?
            .keys()
            .filter(|k| k.starts_with(&scope))
            .cloned()
            .collect();

        self.remove_batched(keys).await
    }

    async fn clear_pattern(&self, pattern: &str) -> Result<(), DomainError> {
        let pattern = KeyPattern::new(pattern)?;

        let keys: Vec<String> = self
            .store
            .read()?
            .keys()
            .filter(|k| {
                self.settings
                    .strip_prefix(k)
                    .is_some_and(|logical| pattern.matches(logical))
            })
            .cloned()
            .collect();

        self.remove_batched(keys).await
    }

    fn child_shared(&self, prefix: &str) -> Arc<dyn Cache<Value = V>> {
        Arc::new(self.child(prefix))
    }

    fn child(&self, prefix: &str) -> Self {
        Self {
            store: self.store.clone(),
            settings: self.settings.child(prefix),
            max_items: self.max_items,
            batch_size: self.batch_size,
            pending: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::{CacheExt, JitterPolicy};
    use futures::TryStreamExt;
    use serde_json::{json, Value};

    fn json_cache() -> InMemoryCache<Value> {
        InMemoryCache::new()
    }

    async fn sorted_keys<C: Cache>(cache: &C, prefix: Option<&str>) -> Vec<String> {
        let mut keys: Vec<String> = cache.keys(prefix).try_collect().await.unwrap();
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = json_cache();

        cache.set("key1", json!("value1"), SetOptions::new()).await.unwrap();

        let result = cache.get("key1").await.unwrap();
        assert_eq!(result, Some(json!("value1")));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let cache = json_cache();

        let result = cache.get("missing").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let cache = json_cache();
        cache.set("key1", json!(1), SetOptions::new()).await.unwrap();

        cache.delete("key1").await.unwrap();
        cache.delete("key1").await.unwrap();
        cache.delete("never-set").await.unwrap();

        assert!(cache.get("key1").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let cache = json_cache();

        cache
            .set("key1", json!("value1"), SetOptions::ttl(Duration::from_millis(50)))
            .await
            .unwrap();

        assert!(cache.get("key1").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.get("key1").await.unwrap().is_none());
        assert!(sorted_keys(&cache, None).await.is_empty());
    }

    #[tokio::test]
    async fn test_not_expired_before_ttl_without_jitter() {
        let cache = json_cache();

        cache
            .set(
                "key1",
                json!(1),
                SetOptions::ttl(Duration::from_secs(2)).with_jitter(JitterPolicy::None),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(cache.get("key1").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_default_ttl_from_config() {
        let cache: InMemoryCache<Value> = InMemoryCache::with_config(
            InMemoryCacheConfig::default().with_default_ttl(Duration::from_millis(30)),
        );

        cache.set("k", json!(true), SetOptions::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_child_isolation() {
        let parent = json_cache();
        let child = parent.child("sess:");

        child.set("abc", json!({"n": 1}), SetOptions::new()).await.unwrap();

        assert_eq!(parent.get("sess:abc").await.unwrap(), Some(json!({"n": 1})));
        assert!(parent.get("abc").await.unwrap().is_none());
        assert_eq!(child.key_prefix(), "sess:");

        parent.set("sess:def", json!(2), SetOptions::new()).await.unwrap();
        assert_eq!(child.get("def").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_parent_clear_pattern_removes_child_entry() {
        let parent = json_cache();
        let child = parent.child("sess:");
        child.set("abc", json!(1), SetOptions::new()).await.unwrap();
        parent.set("other", json!(2), SetOptions::new()).await.unwrap();

        parent.clear_pattern("sess:*").await.unwrap();

        assert!(child.get("abc").await.unwrap().is_none());
        assert_eq!(parent.get("other").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_keys_with_prefix() {
        let cache: InMemoryCache<Value> =
            InMemoryCache::with_config(InMemoryCacheConfig::default().with_key_prefix("app:"));
        cache.set("user:1", json!(1), SetOptions::new()).await.unwrap();
        cache.set("user:2", json!(2), SetOptions::new()).await.unwrap();
        cache.set("team:1", json!(3), SetOptions::new()).await.unwrap();

        assert_eq!(sorted_keys(&cache, Some("user:")).await, vec!["user:1", "user:2"]);
        assert_eq!(sorted_keys(&cache, None).await.len(), 3);
    }

    #[tokio::test]
    async fn test_clear_with_prefix() {
        let cache = json_cache();
        let child = cache.child("c:");
        cache.set("a:1", json!(1), SetOptions::new()).await.unwrap();
        cache.set("a:2", json!(2), SetOptions::new()).await.unwrap();
        child.set("a:1", json!(3), SetOptions::new()).await.unwrap();

        child.clear(None).await.unwrap();
        assert_eq!(sorted_keys(&cache, None).await, vec!["a:1", "a:2"]);

        cache.clear(Some("a:")).await.unwrap();
        assert!(cache.is_empty());

        // Empty selection
        cache.clear(Some("nothing:")).await.unwrap();
        cache.clear(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_pattern_is_anchored() {
        let cache = json_cache();
        cache.set("user:1:profile", json!(1), SetOptions::new()).await.unwrap();
        cache.set("user:2:profile", json!(2), SetOptions::new()).await.unwrap();
        cache.set("user:2:profile:old", json!(3), SetOptions::new()).await.unwrap();
        cache.set("other:key", json!(4), SetOptions::new()).await.unwrap();

        cache.clear_pattern("user:*:profile").await.unwrap();

        assert_eq!(
            sorted_keys(&cache, None).await,
            vec!["other:key", "user:2:profile:old"]
        );
    }

    #[tokio::test]
    async fn test_max_items_one_keeps_exactly_one() {
        let cache: InMemoryCache<Value> =
            InMemoryCache::with_config(InMemoryCacheConfig::default().with_max_items(1));

        cache.set("first", json!(1), SetOptions::new()).await.unwrap();
        cache.set("second", json!(2), SetOptions::new()).await.unwrap();

        cache.run_housekeeping().await;

        assert_eq!(cache.len(), 1);
        let keys = sorted_keys(&cache, None).await;
        assert!(keys == vec!["first"] || keys == vec!["second"]);
    }

    #[tokio::test]
    async fn test_scheduled_housekeeping_runs_in_background() {
        let cache: InMemoryCache<Value> = InMemoryCache::with_config(
            InMemoryCacheConfig::default()
                .with_max_items(1)
                .with_housekeeping_batch_size(1),
        );

        cache.set("first", json!(1), SetOptions::new()).await.unwrap();
        cache.set("second", json!(2), SetOptions::new()).await.unwrap();

        for _ in 0..50 {
            if cache.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_housekeeping_removes_expired_entries() {
        let cache: InMemoryCache<Value> = InMemoryCache::with_config(
            InMemoryCacheConfig::default()
                .unbounded()
                .with_housekeeping_batch_size(2),
        );

        for i in 0..5 {
            cache
                .set(&format!("k{}", i), json!(i), SetOptions::ttl(Duration::from_millis(10)))
                .await
                .unwrap();
        }
        cache.set("keep", json!("x"), SetOptions::new()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.run_housekeeping().await;

        assert_eq!(cache.store.read().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_eviction_is_scoped_to_namespace() {
        let root: InMemoryCache<Value> =
            InMemoryCache::with_config(InMemoryCacheConfig::default().unbounded());
        root.set("outside", json!(0), SetOptions::new()).await.unwrap();

        let bounded = InMemoryCache {
            max_items: Some(1),
            ..root.child("ns:")
        };
        bounded.set("a", json!(1), SetOptions::new()).await.unwrap();
        bounded.set("b", json!(2), SetOptions::new()).await.unwrap();

        bounded.run_housekeeping().await;

        assert_eq!(bounded.len(), 1);
        assert_eq!(root.get("outside").await.unwrap(), Some(json!(0)));
    }

    #[tokio::test]
    async fn test_eviction_count_carries_across_batches() {
        let cache: InMemoryCache<Value> = InMemoryCache::with_config(
            InMemoryCacheConfig::default()
                .with_max_items(2)
                .with_housekeeping_batch_size(1),
        );
        for i in 0..10 {
            cache
                .store
                .write()
                .unwrap()
                .insert(format!("k{}", i), CacheEntry::new(json!(i), None));
        }

        cache.run_housekeeping().await;

        // Seven certain evictions bring the count to 3, where the odds drop to one half.
        let remaining = cache.len();
        assert!((2..=3).contains(&remaining), "remaining = {}", remaining);
    }

    #[tokio::test]
    async fn test_jittered_ttl_stays_within_policy_bounds() {
        let cache = json_cache();
        let ttl = Duration::from_millis(300);
        let ttl_ms = ttl.as_millis() as i64;

        for (policy, floor_ms) in [(JitterPolicy::Full, 0), (JitterPolicy::Equal, ttl_ms / 2)] {
            for i in 0..20 {
                let key = format!("{:?}:{}", policy, i);
                let before = now_millis();
                cache
                    .set(&key, json!(i), SetOptions::ttl(ttl).with_jitter(policy))
                    .await
                    .unwrap();
                let after = now_millis();

                let expires_at = cache.store.read().unwrap()[&key]
                    .expires_at
                    .expect("ttl was set");
                assert!(expires_at >= before + floor_ms - 1, "{:?} expired too early", policy);
                assert!(expires_at <= after + ttl_ms + 1, "{:?} outlived its ttl", policy);
            }
        }

        tokio::time::sleep(ttl + Duration::from_millis(50)).await;

        assert!(sorted_keys(&cache, None).await.is_empty());
        assert!(cache.get("Full:0").await.unwrap().is_none());
        assert!(cache.get("Equal:0").await.unwrap().is_none());
    }

    #[test]
    fn test_eviction_probability() {
        assert_eq!(eviction_probability(5, 10), 0.0);
        assert_eq!(eviction_probability(10, 10), 0.0);
        assert_eq!(eviction_probability(15, 10), 0.5);
        assert_eq!(eviction_probability(2, 1), 1.0);
        assert_eq!(eviction_probability(50, 10), 1.0);
    }

    #[tokio::test]
    async fn test_remember_through_in_memory() {
        let cache = json_cache();

        let first = cache
            .remember("k", || async { Ok(Some(json!("computed"))) }, SetOptions::new())
            .await
            .unwrap();
        let second = cache
            .remember("k", || async { Ok(Some(json!("ignored"))) }, SetOptions::new())
            .await
            .unwrap();

        assert_eq!(first, Some(json!("computed")));
        assert_eq!(second, Some(json!("computed")));
    }

    #[tokio::test]
    async fn test_non_json_values() {
        let cache: InMemoryCache<Vec<u8>> = InMemoryCache::new();
        cache.set("bytes", vec![1, 2, 3], SetOptions::new()).await.unwrap();
        assert_eq!(cache.get("bytes").await.unwrap(), Some(vec![1, 2, 3]));
    }
}
