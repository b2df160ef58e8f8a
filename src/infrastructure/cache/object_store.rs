//! Object storage cache implementation (S3-compatible buckets)

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::domain::cache::{
    now_millis, Cache, CacheSettings, Jitter, KeyPattern, KeyStream, SetOptions,
};
use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Metadata field holding the absolute expiry in epoch milliseconds
pub const EXPIRES_AT_METADATA: &str = "expires-at";

/// Maximum number of keys per batch delete request
pub const MAX_DELETE_BATCH: usize = 1000;

/// An object body with its user metadata
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub body: Bytes,
    pub metadata: HashMap<String, String>,
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectListing {
    pub keys: Vec<String>,
    /// Token for the next page, `None` on the last page
    pub next_token: Option<String>,
}

/// Trait for object storage operations (for mocking)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStoreClient: Send + Sync + std::fmt::Debug {
    /// Fetches an object, `None` when the key does not exist
    async fn get_object(&self, key: &str) -> Result<Option<StoredObject>, DomainError>;

    /// Fetches only the metadata of an object
    async fn head_object(&self, key: &str)
        -> Result<Option<HashMap<String, String>>, DomainError>;

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        metadata: HashMap<String, String>,
    ) -> Result<(), DomainError>;

    async fn delete_object(&self, key: &str) -> Result<(), DomainError>;

    /// Deletes up to [`MAX_DELETE_BATCH`] objects in one request
    async fn delete_objects(&self, keys: Vec<String>) -> Result<(), DomainError>;

    /// Lists keys under `prefix`, one page at a time
    async fn list_objects(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ObjectListing, DomainError>;
}

/// S3 client wrapper bound to one bucket
#[derive(Debug, Clone)]
pub struct S3ObjectStoreClient {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStoreClient {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Builds a client from the default AWS configuration chain
    ///
    /// A custom endpoint (MinIO, LocalStack) switches to path-style addressing.
    pub async fn from_env(
        bucket: impl Into<String>,
        region: Option<String>,
        endpoint_url: Option<String>,
    ) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        if let Some(endpoint_url) = &endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(endpoint_url.is_some())
            .build();

        Self::new(S3Client::from_conf(s3_config), bucket)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStoreClient for S3ObjectStoreClient {
    async fn get_object(&self, key: &str) -> Result<Option<StoredObject>, DomainError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        let output = match response {
            Ok(output) => output,
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    return Ok(None);
                }
                return Err(DomainError::cache(format!(
                    "S3 get_object error: {}",
                    DisplayErrorContext(&service_error)
                )));
            }
        };

        let metadata = output.metadata().cloned().unwrap_or_default();
        let body = output
            .body
            .collect()
            .await
            .map_err(|e| DomainError::cache(format!("Failed to read S3 object body: {}", e)))?
            .into_bytes();

        Ok(Some(StoredObject { body, metadata }))
    }

    async fn head_object(
        &self,
        key: &str,
    ) -> Result<Option<HashMap<String, String>>, DomainError> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match response {
            Ok(output) => Ok(Some(output.metadata().cloned().unwrap_or_default())),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(None)
                } else {
                    Err(DomainError::cache(format!(
                        "S3 head_object error: {}",
                        DisplayErrorContext(&service_error)
                    )))
                }
            }
        }
    }

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        metadata: HashMap<String, String>,
    ) -> Result<(), DomainError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_metadata((!metadata.is_empty()).then_some(metadata))
            .send()
            .await
            .map_err(|e| {
                DomainError::cache(format!("S3 put_object error: {}", DisplayErrorContext(&e)))
            })?;

        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), DomainError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                DomainError::cache(format!("S3 delete_object error: {}", DisplayErrorContext(&e)))
            })?;

        Ok(())
    }

    async fn delete_objects(&self, keys: Vec<String>) -> Result<(), DomainError> {
        if keys.is_empty() {
            return Ok(());
        }

        let objects = keys
            .into_iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DomainError::internal(format!("Invalid object identifier: {}", e)))?;

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| DomainError::internal(format!("Invalid delete request: {}", e)))?;

        let output = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| {
                DomainError::cache(format!("S3 delete_objects error: {}", DisplayErrorContext(&e)))
            })?;

        if let Some(error) = output.errors().first() {
            return Err(DomainError::cache(format!(
                "S3 delete_objects failed for {} key(s), first '{}': {}",
                output.errors().len(),
                error.key().unwrap_or("?"),
                error.message().unwrap_or("unknown error")
            )));
        }

        Ok(())
    }

    async fn list_objects(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ObjectListing, DomainError> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_continuation_token(continuation_token)
            .send()
            .await
            .map_err(|e| {
                DomainError::cache(format!("S3 list_objects_v2 error: {}", DisplayErrorContext(&e)))
            })?;

        let keys = output
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .collect();

        let next_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ObjectListing { keys, next_token })
    }
}

/// Configuration for the object storage cache
#[derive(Debug, Clone, Default)]
pub struct ObjectStoreCacheConfig {
    pub bucket: String,
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores
    pub endpoint_url: Option<String>,
    pub key_prefix: String,
    pub default_ttl: Option<Duration>,
    pub default_jitter: Jitter,
}

impl ObjectStoreCacheConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

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

    fn settings(&self) -> CacheSettings {
        CacheSettings::new(self.key_prefix.clone())
            .with_default_ttl(self.default_ttl)
            .with_default_jitter(self.default_jitter.clone())
    }
}

/// Whether object metadata marks the object as expired at `now`
fn is_expired(metadata: &HashMap<String, String>, now: i64) -> bool {
    metadata
        .get(EXPIRES_AT_METADATA)
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .is_some_and(|expires_at| expires_at <= now)
}

struct ListState {
    buffer: VecDeque<String>,
    token: Option<String>,
    exhausted: bool,
}

/// Cache storing raw bytes as objects in a bucket
///
/// Expiry lives in the `expires-at` object metadata and is enforced on read.
/// Fetch failures read as missing, writes are best-effort and deletes
/// propagate errors.
#[derive(Debug)]
pub struct ObjectStoreCache<C: ObjectStoreClient + 'static = S3ObjectStoreClient> {
    client: Arc<C>,
    settings: CacheSettings,
}

impl<C: ObjectStoreClient + 'static> Clone for ObjectStoreCache<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            settings: self.settings.clone(),
        }
    }
}

impl ObjectStoreCache<S3ObjectStoreClient> {
    /// Creates an S3-backed cache using the default AWS credential chain
    pub async fn connect(config: ObjectStoreCacheConfig) -> Result<Self, DomainError> {
        if config.bucket.trim().is_empty() {
            return Err(DomainError::configuration(
                "Object store cache requires a bucket name",
            ));
        }

        let client = S3ObjectStoreClient::from_env(
            config.bucket.clone(),
            config.region.clone(),
            config.endpoint_url.clone(),
        )
        .await;

        Ok(Self::with_client(client, &config))
    }
}

impl<C: ObjectStoreClient + 'static> ObjectStoreCache<C> {
    pub fn with_client(client: C, config: &ObjectStoreCacheConfig) -> Self {
        Self {
            client: Arc::new(client),
            settings: config.settings(),
        }
    }

    /// Whether a listed object still exists and has not expired
    async fn is_live(&self, full_key: &str) -> Result<bool, DomainError> {
        Ok(self
            .client
            .head_object(full_key)
            .await?
            .is_some_and(|metadata| !is_expired(&metadata, now_millis())))
    }

    /// Collects every fully-qualified key under `prefix`
    async fn list_all(&self, prefix: &str) -> Result<Vec<String>, DomainError> {
        let mut keys = Vec::new();
        let mut token = None;

        loop {
            let listing = self.client.list_objects(prefix, token).await?;
            keys.extend(listing.keys);

            match listing.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        Ok(keys)
    }

    async fn delete_batched(&self, keys: Vec<String>) -> Result<(), DomainError> {
        let total = keys.len();

        for chunk in keys.chunks(MAX_DELETE_BATCH) {
            self.client.delete_objects(chunk.to_vec()).await?;
        }

        debug!(deleted = total, prefix = %self.settings.key_prefix, "Deleted cache objects");
        Ok(())
    }
}

#[async_trait]
impl<C: ObjectStoreClient + 'static> Cache for ObjectStoreCache<C> {
    type Value = Bytes;

    fn key_prefix(&self) -> &str {
        &self.settings.key_prefix
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, DomainError> {
        let full_key = self.settings.full_key(key);

        let object = match self.client.get_object(&full_key).await {
            Ok(Some(object)) => object,
            Ok(None) => return Ok(None),
            Err(e) => {
                debug!(key = %full_key, error = %e, "Object fetch failed, treating as missing");
                return Ok(None);
            }
        };

        if is_expired(&object.metadata, now_millis()) {
            let client = Arc::clone(&self.client);
            tokio::spawn(async move {
                if let Err(e) = client.delete_object(&full_key).await {
                    warn!(key = %full_key, error = %e, "Failed to delete expired object");
                }
            });
            return Ok(None);
        }

        Ok(Some(object.body))
    }

    async fn set(&self, key: &str, value: Bytes, options: SetOptions) -> Result<(), DomainError> {
        let full_key = self.settings.full_key(key);

        let mut metadata = HashMap::new();
        if let Some(expires_at) = self.settings.expires_at(&options) {
            metadata.insert(EXPIRES_AT_METADATA.to_string(), expires_at.to_string());
        }

        if let Err(e) = self.client.put_object(&full_key, value, metadata).await {
            warn!(key = %full_key, error = %e, "Cache write failed");
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DomainError> {
        self.client.delete_object(&self.settings.full_key(key)).await
    }

    fn keys<'a>(&'a self, prefix: Option<&'a str>) -> KeyStream<'a> {
        let list_prefix = self.settings.full_key(prefix.unwrap_or(""));
        let state = ListState {
            buffer: VecDeque::new(),
            token: None,
            exhausted: false,
        };

        futures::stream::try_unfold(state, move |mut state| {
            let list_prefix = list_prefix.clone();
            async move {
                loop {
                    while let Some(full_key) = state.buffer.pop_front() {
                        let Some(logical) = self.settings.strip_prefix(&full_key) else {
                            continue;
                        };
                        if self.is_live(&full_key).await? {
                            let logical = logical.to_string();
                            return Ok::<_, DomainError>(Some((logical, state)));
                        }
                    }

                    if state.exhausted {
                        return Ok(None);
                    }

                    let listing = self
                        .client
                        .list_objects(&list_prefix, state.token.take())
                        .await?;
                    state.exhausted = listing.next_token.is_none();
                    state.token = listing.next_token;
                    state.buffer.extend(listing.keys);
                }
            }
        })
        .boxed()
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<(), DomainError> {
        let keys = self
            .list_all(&self.settings.full_key(prefix.unwrap_or("")))
            .await?;
        self.delete_batched(keys).await
    }

    async fn clear_pattern(&self, pattern: &str) -> Result<(), DomainError> {
        let pattern = KeyPattern::new(pattern)?;

        let keys = self
            .list_all(&self.settings.key_prefix)
            .await?
            .into_iter()
            .filter(|full_key| {
                self.settings
                    .strip_prefix(full_key)
                    .is_some_and(|logical| pattern.matches(logical))
            })
            .collect();

        self.delete_batched(keys).await
    }

    fn child_shared(&self, prefix: &str) -> Arc<dyn Cache<Value = Bytes>> {
        Arc::new(self.child(prefix))
    }

    fn child(&self, prefix: &str) -> Self {
        Self {
            client: Arc::clone(&self.client),
            settings: self.settings.child(prefix),
        }
    }
}
