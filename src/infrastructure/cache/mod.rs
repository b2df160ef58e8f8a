//! Cache infrastructure - Cache implementations

mod factory;
mod in_memory;
mod json_bytes;
mod object_store;
mod redis;

pub use factory::{CacheConfig, CacheFactory, CacheType, SharedCache};
pub use in_memory::{eviction_probability, InMemoryCache, InMemoryCacheConfig};
pub use json_bytes::JsonBytesCache;
pub use object_store::{
    ObjectListing, ObjectStoreCache, ObjectStoreCacheConfig, ObjectStoreClient,
    S3ObjectStoreClient, StoredObject, EXPIRES_AT_METADATA, MAX_DELETE_BATCH,
};
pub use redis::{RedisCache, RedisCacheConfig, RedisTopology};
