//! Cache domain - Generic caching abstraction layer

mod entry;
pub mod jitter;
mod pattern;
mod repository;

pub use entry::{now_millis, CacheEntry, CacheSettings, SetOptions};
pub use jitter::{create_jitter, custom_jitter, Jitter, JitterFn, JitterPolicy};
pub use pattern::{escape_redis_glob, glob_to_redis, KeyPattern};
pub use repository::{Cache, CacheExt, KeyStream};

#[cfg(test)]
pub use repository::mock::MockCache;
