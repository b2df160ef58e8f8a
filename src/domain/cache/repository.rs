//! Cache trait definition

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{de::DeserializeOwned, Serialize};

use super::entry::SetOptions;
use crate::domain::DomainError;

/// Lazy, single-pass enumeration of logical keys
pub type KeyStream<'a> = BoxStream<'a, Result<String, DomainError>>;

/// Key-value cache capability shared by every backend
///
/// Keys passed to and returned from these methods are logical keys: the
/// instance's key prefix is added on the way in and stripped on the way out.
#[async_trait]
pub trait Cache: Send + Sync + Debug {
    /// Value type stored by the backend
    type Value: Clone + Send + Sync + 'static;

    /// Prefix prepended to every key of this instance
    fn key_prefix(&self) -> &str;

    /// Gets a value, `None` when missing or expired
    async fn get(&self, key: &str) -> Result<Option<Self::Value>, DomainError>;

    /// Stores a value; expiry is computed once, at write time
    async fn set(
        &self,
        key: &str,
        value: Self::Value,
        options: SetOptions,
    ) -> Result<(), DomainError>;

    /// Removes a value; removing a missing key is a no-op
    async fn delete(&self, key: &str) -> Result<(), DomainError>;

    /// Enumerates live keys starting with `prefix` (all keys when `None`)
    fn keys<'a>(&'a self, prefix: Option<&'a str>) -> KeyStream<'a>;

    /// Removes every entry of the namespace, optionally narrowed by `prefix`
    async fn clear(&self, prefix: Option<&str>) -> Result<(), DomainError>;

    /// Removes every entry whose logical key matches the glob
    async fn clear_pattern(&self, pattern: &str) -> Result<(), DomainError>;

    /// A view over the same storage with `prefix` appended to the key prefix
    fn child(&self, prefix: &str) -> Self
    where
        Self: Sized;

    /// [`Cache::child`] for callers holding a shared trait object
    ///
    /// The returned view shares storage (and connection) with `self`.
    fn child_shared(&self, prefix: &str) -> Arc<dyn Cache<Value = Self::Value>>;
}

/// Extension trait with operations built only from [`Cache`] primitives
pub trait CacheExt: Cache {
    /// Returns the cached value or computes, stores and returns a new one
    ///
    /// A value returned by `compute` is stored with `options`. `Ok(None)` from
    /// `compute` is returned without writing and an error is propagated without
    /// writing. There is no locking: concurrent callers missing the same key
    /// each run `compute` and each write.
    fn remember<'a, F, Fut>(
        &'a self,
        key: &'a str,
        compute: F,
        options: SetOptions,
    ) -> impl Future<Output = Result<Option<Self::Value>, DomainError>> + Send + 'a
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<Option<Self::Value>, DomainError>> + Send + 'a,
    {
        async move {
            if let Some(value) = self.get(key).await? {
                return Ok(Some(value));
            }

            match compute().await? {
                Some(value) => {
                    self.set(key, value.clone(), options).await?;
                    Ok(Some(value))
                }
                None => Ok(None),
            }
        }
    }

    /// Gets a typed value from a JSON-valued cache
    fn get_as<'a, V>(
        &'a self,
        key: &'a str,
    ) -> impl Future<Output = Result<Option<V>, DomainError>> + Send + 'a
    where
        Self: Cache<Value = serde_json::Value>,
        V: DeserializeOwned + Send,
    {
        async move {
            match self.get(key).await? {
                Some(data) => {
                    let value: V = serde_json::from_value(data).map_err(|e| {
                        DomainError::serialization(format!(
                            "Failed to deserialize cache value '{}': {}",
                            key, e
                        ))
                    })?;
                    Ok(Some(value))
                }
                None => Ok(None),
            }
        }
    }

    /// Sets a typed value in a JSON-valued cache
    fn set_as<'a, V>(
        &'a self,
        key: &'a str,
        value: &'a V,
        options: SetOptions,
    ) -> impl Future<Output = Result<(), DomainError>> + Send + 'a
    where
        Self: Cache<Value = serde_json::Value>,
        V: Serialize + Send + Sync,
    {
        async move {
            let data = serde_json::to_value(value).map_err(|e| {
                DomainError::serialization(format!("Failed to serialize cache value: {}", e))
            })?;
            self.set(key, data, options).await
        }
    }
}

// Blanket implementation for all types implementing Cache
impl<T: Cache + ?Sized> CacheExt for T {}
