//! Cache factory for runtime selection

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::info;

use crate::domain::cache::{Cache, JitterPolicy};
use crate::domain::DomainError;

use super::in_memory::{InMemoryCache, InMemoryCacheConfig};
use super::json_bytes::JsonBytesCache;
use super::object_store::{ObjectStoreCache, ObjectStoreCacheConfig};
use super::redis::{RedisCache, RedisCacheConfig};

/// A JSON-valued cache shared across the application
pub type SharedCache = Arc<dyn Cache<Value = Value>>;

/// Supported cache types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheType {
    /// Process-local map with housekeeping
    #[default]
    InMemory,
    /// Redis, single node or cluster
    Redis,
    /// S3-compatible bucket
    ObjectStore,
}

impl std::fmt::Display for CacheType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheType::InMemory => write!(f, "in_memory"),
            CacheType::Redis => write!(f, "redis"),
            CacheType::ObjectStore => write!(f, "object_store"),
        }
    }
}

impl std::str::FromStr for CacheType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_memory" | "inmemory" | "memory" => Ok(CacheType::InMemory),
            "redis" => Ok(CacheType::Redis),
            "object_store" | "objectstore" | "s3" => Ok(CacheType::ObjectStore),
            _ => Err(DomainError::configuration(format!(
                "Unknown cache type: {}. Valid types: in_memory, redis, object_store",
                s
            ))),
        }
    }
}

/// Configuration for cache factory
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Type of cache to create
    pub cache_type: CacheType,
    /// Key prefix for namespacing
    pub key_prefix: String,
    /// Default TTL for entries, `None` keeps entries until removed
    pub default_ttl: Option<Duration>,
    /// Default jitter policy
    pub default_jitter: JitterPolicy,
    /// Soft entry limit (in-memory only)
    pub max_items: Option<usize>,
    /// Redis URL for a single node
    pub redis_url: Option<String>,
    /// Redis cluster seed nodes; takes precedence over `redis_url`
    pub redis_cluster_nodes: Vec<String>,
    /// Bucket name (object store only)
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: CacheType::InMemory,
            key_prefix: String::new(),
            default_ttl: None,
            default_jitter: JitterPolicy::None,
            max_items: Some(10_000),
            redis_url: None,
            redis_cluster_nodes: Vec::new(),
            bucket: None,
            region: None,
            endpoint_url: None,
        }
    }
}

impl CacheConfig {
    /// Creates a new configuration for in-memory cache
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Creates a new configuration for Redis cache
    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            cache_type: CacheType::Redis,
            redis_url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Creates a new configuration for a Redis cluster
    pub fn redis_cluster<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cache_type: CacheType::Redis,
            redis_cluster_nodes: nodes.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Creates a new configuration for an object store bucket
    pub fn object_store(bucket: impl Into<String>) -> Self {
        Self {
            cache_type: CacheType::ObjectStore,
            bucket: Some(bucket.into()),
            ..Default::default()
        }
    }

    /// Sets the key prefix
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Sets the default TTL
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn with_default_jitter(mut self, jitter: JitterPolicy) -> Self {
        self.default_jitter = jitter;
        self
    }

    /// Sets the soft entry limit (in-memory only)
    pub fn with_max_items(mut self, max_items: Option<usize>) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    /// Creates config from environment variables
    pub fn from_env() -> Result<Self, DomainError> {
        let cache_type = std::env::var("CACHE_TYPE")
            .unwrap_or_else(|_| "in_memory".to_string())
            .parse()?;

        let default_ttl = std::env::var("CACHE_DEFAULT_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs);

        let default_jitter = std::env::var("CACHE_DEFAULT_JITTER")
            .map(|v| JitterPolicy::from_name(&v))
            .unwrap_or_default();

        let max_items = match std::env::var("CACHE_MAX_ITEMS") {
            Ok(v) => match v.parse::<usize>() {
                Ok(0) => None,
                Ok(n) => Some(n),
                Err(_) => {
                    return Err(DomainError::configuration(format!(
                        "Invalid CACHE_MAX_ITEMS: {}",
                        v
                    )));
                }
            },
            Err(_) => Some(10_000),
        };

        let redis_cluster_nodes = std::env::var("REDIS_CLUSTER_NODES")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            cache_type,
            key_prefix: std::env::var("CACHE_KEY_PREFIX").unwrap_or_default(),
            default_ttl,
            default_jitter,
            max_items,
            redis_url: std::env::var("REDIS_URL").ok(),
            redis_cluster_nodes,
            bucket: std::env::var("CACHE_BUCKET").ok(),
            region: std::env::var("AWS_REGION").ok(),
            endpoint_url: std::env::var("CACHE_ENDPOINT_URL").ok(),
        })
    }

    fn redis_config(&self) -> Result<RedisCacheConfig, DomainError> {
        let config = if !self.redis_cluster_nodes.is_empty() {
            RedisCacheConfig::cluster(self.redis_cluster_nodes.clone())
        } else {
            let url = self.redis_url.clone().ok_or_else(|| {
                DomainError::configuration("Redis URL is required for Redis cache type")
            })?;
            RedisCacheConfig::new(url)
        };

        let mut config = config
            .with_key_prefix(self.key_prefix.clone())
            .with_default_jitter(self.default_jitter);
        config.default_ttl = self.default_ttl;
        Ok(config)
    }

    fn object_store_config(&self) -> Result<ObjectStoreCacheConfig, DomainError> {
        let bucket = self.bucket.clone().ok_or_else(|| {
            DomainError::configuration("Bucket is required for object store cache type")
        })?;

        let mut config = ObjectStoreCacheConfig::new(bucket)
            .with_key_prefix(self.key_prefix.clone())
            .with_default_jitter(self.default_jitter);
        config.default_ttl = self.default_ttl;
        config.region = self.region.clone();
        config.endpoint_url = self.endpoint_url.clone();
        Ok(config)
    }

    fn in_memory_config(&self) -> InMemoryCacheConfig {
        let mut config = InMemoryCacheConfig::default()
            .with_key_prefix(self.key_prefix.clone())
            .with_default_jitter(self.default_jitter);
        config.default_ttl = self.default_ttl;
        config.max_items = self.max_items;
        config
    }
}

/// Factory for creating cache instances
#[derive(Debug, Default)]
pub struct CacheFactory;

impl CacheFactory {
    /// Creates a new cache factory
    pub fn new() -> Self {
        Self
    }

    /// Creates a JSON-valued cache based on configuration
    ///
    /// The object store keeps raw bytes, so it is wrapped in [`JsonBytesCache`].
    pub async fn create(&self, config: &CacheConfig) -> Result<SharedCache, DomainError> {
        info!(
            backend = %config.cache_type,
            prefix = %config.key_prefix,
            "Creating cache"
        );

        match config.cache_type {
            CacheType::InMemory => Ok(Arc::new(InMemoryCache::<Value>::with_config(
                config.in_memory_config(),
            ))),
            CacheType::Redis => Ok(Arc::new(RedisCache::new(config.redis_config()?)?)),
            CacheType::ObjectStore => {
                let cache = self.create_object_store(config).await?;
                Ok(Arc::new(JsonBytesCache::new(cache)))
            }
        }
    }

    /// Creates an in-memory cache with default settings
    pub fn create_in_memory(&self) -> SharedCache {
        Arc::new(InMemoryCache::<Value>::new())
    }

    /// Creates an in-memory cache with custom configuration
    pub fn create_in_memory_with_config(&self, config: InMemoryCacheConfig) -> SharedCache {
        Arc::new(InMemoryCache::<Value>::with_config(config))
    }

    /// Creates a Redis cache with custom configuration
    pub fn create_redis_with_config(
        &self,
        config: RedisCacheConfig,
    ) -> Result<SharedCache, DomainError> {
        Ok(Arc::new(RedisCache::new(config)?))
    }

    /// Creates the byte-valued object store cache
    pub async fn create_object_store(
        &self,
        config: &CacheConfig,
    ) -> Result<ObjectStoreCache, DomainError> {
        ObjectStoreCache::connect(config.object_store_config()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::{CacheExt, SetOptions};
    use serde_json::json;

    #[test]
    fn test_cache_type_from_str() {
        assert_eq!("in_memory".parse::<CacheType>().unwrap(), CacheType::InMemory);
        assert_eq!("inmemory".parse::<CacheType>().unwrap(), CacheType::InMemory);
        assert_eq!("memory".parse::<CacheType>().unwrap(), CacheType::InMemory);
        assert_eq!("redis".parse::<CacheType>().unwrap(), CacheType::Redis);
        assert_eq!("REDIS".parse::<CacheType>().unwrap(), CacheType::Redis);
        assert_eq!("s3".parse::<CacheType>().unwrap(), CacheType::ObjectStore);
        assert_eq!(
            "object_store".parse::<CacheType>().unwrap(),
            CacheType::ObjectStore
        );
    }

    #[test]
    fn test_cache_type_from_str_invalid() {
        let result = "invalid".parse::<CacheType>();
        assert!(matches!(result, Err(DomainError::Configuration { .. })));
    }

    #[test]
    fn test_cache_config_in_memory() {
        let config = CacheConfig::in_memory()
            .with_max_items(Some(1000))
            .with_default_ttl(Duration::from_secs(300));

        assert_eq!(config.cache_type, CacheType::InMemory);
        assert_eq!(config.max_items, Some(1000));
        assert_eq!(config.default_ttl, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_cache_config_redis() {
        let config = CacheConfig::redis("redis://localhost:6379")
            .with_key_prefix("myapp:")
            .with_default_jitter(JitterPolicy::Equal);

        let redis = config.redis_config().unwrap();
        assert_eq!(
            redis.topology,
            crate::infrastructure::cache::RedisTopology::Single(
                "redis://localhost:6379".to_string()
            )
        );
        assert_eq!(redis.key_prefix, "myapp:");
    }

    #[test]
    fn test_cluster_nodes_take_precedence() {
        let mut config = CacheConfig::redis_cluster(["redis://a:7000", "redis://b:7001"]);
        config.redis_url = Some("redis://single:6379".to_string());

        let redis = config.redis_config().unwrap();
        assert!(matches!(
            redis.topology,
            crate::infrastructure::cache::RedisTopology::Cluster(ref nodes) if nodes.len() == 2
        ));
    }

    #[tokio::test]
    async fn test_factory_create_in_memory() {
        let factory = CacheFactory::new();
        let config = CacheConfig::in_memory().with_key_prefix("t:");

        let cache = factory.create(&config).await.unwrap();
        assert_eq!(cache.key_prefix(), "t:");

        cache
            .set("test", json!("value"), SetOptions::ttl(Duration::from_secs(60)))
            .await
            .unwrap();

        let result: Option<String> = cache.get_as("test").await.unwrap();
        assert_eq!(result, Some("value".to_string()));
    }

    #[tokio::test]
    async fn test_factory_create_redis_missing_url() {
        let factory = CacheFactory::new();
        let config = CacheConfig {
            cache_type: CacheType::Redis,
            redis_url: None,
            ..Default::default()
        };

        let result = factory.create(&config).await;
        assert!(matches!(result, Err(DomainError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_factory_create_object_store_missing_bucket() {
        let factory = CacheFactory::new();
        let config = CacheConfig {
            cache_type: CacheType::ObjectStore,
            ..Default::default()
        };

        let result = factory.create(&config).await;
        assert!(matches!(result, Err(DomainError::Configuration { .. })));
    }

    #[test]
    fn test_cache_type_display() {
        assert_eq!(CacheType::InMemory.to_string(), "in_memory");
        assert_eq!(CacheType::Redis.to_string(), "redis");
        assert_eq!(CacheType::ObjectStore.to_string(), "object_store");
    }
}
