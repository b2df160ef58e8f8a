//! JSON view over a byte-valued cache

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tracing::warn;

use crate::domain::cache::{Cache, KeyStream, SetOptions};
use crate::domain::DomainError;

/// Stores JSON values as UTF-8 bytes in an inner byte cache
///
/// Lets the object store back anything expecting a JSON cache (sessions, the
/// factory). Undecodable payloads read as missing.
#[derive(Debug, Clone)]
pub struct JsonBytesCache<C> {
    inner: C,
}

impl<C> JsonBytesCache<C>
where
    C: Cache<Value = Bytes>,
{
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C> Cache for JsonBytesCache<C>
where
    C: Cache<Value = Bytes> + 'static,
{
    type Value = Value;

    fn key_prefix(&self) -> &str {
        self.inner.key_prefix()
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, DomainError> {
        let Some(bytes) = self.inner.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable cache value");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Value, options: SetOptions) -> Result<(), DomainError> {
        let bytes = serde_json::to_vec(&value)?;
        self.inner.set(key, Bytes::from(bytes), options).await
    }

    async fn delete(&self, key: &str) -> Result<(), DomainError> {
        self.inner.delete(key).await
    }

    fn keys<'a>(&'a self, prefix: Option<&'a str>) -> KeyStream<'a> {
        self.inner.keys(prefix)
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<(), DomainError> {
        self.inner.clear(prefix).await
    }

    async fn clear_pattern(&self, pattern: &str) -> Result<(), DomainError> {
        self.inner.clear_pattern(pattern).await
    }

    fn child_shared(&self, prefix: &str) -> Arc<dyn Cache<Value = Value>> {
        Arc::new(self.child(prefix))
    }

    fn child(&self, prefix: &str) -> Self {
        Self {
            inner: self.inner.child(prefix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::{InMemoryCache, InMemoryCacheConfig};
    use serde_json::json;

    fn bytes_cache() -> InMemoryCache<Bytes> {
        InMemoryCache::with_config(InMemoryCacheConfig::default().with_key_prefix("b:"))
    }

    #[tokio::test]
    async fn test_json_round_trip_through_bytes() {
        let inner = bytes_cache();
        let cache = JsonBytesCache::new(inner.clone());

        cache
            .set("user", json!({"name": "ada"}), SetOptions::new())
            .await
            .unwrap();

        let raw = inner.get("user").await.unwrap().unwrap();
        assert_eq!(&raw[..], br#"{"name":"ada"}"#);
        assert_eq!(cache.get("user").await.unwrap(), Some(json!({"name": "ada"})));
    }

    #[tokio::test]
    async fn test_invalid_payload_reads_as_missing() {
        let inner = bytes_cache();
        inner
            .set("bad", Bytes::from_static(b"\xff\xfe"), SetOptions::new())
            .await
            .unwrap();

        let cache = JsonBytesCache::new(inner);
        assert!(cache.get("bad").await.unwrap().is_none());
    }

    #[test]
    fn test_child_wraps_inner_child() {
        let cache = JsonBytesCache::new(bytes_cache());
        assert_eq!(cache.child("s:").key_prefix(), "b:s:");
    }
}
