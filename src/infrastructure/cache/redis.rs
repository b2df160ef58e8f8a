//! Redis cache implementation (single node or cluster)

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use redis::aio::{ConnectionManager, ConnectionManagerConfig, MultiplexedConnection};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{
    Client, Cmd, ConnectionAddr, ConnectionInfo, FromRedisValue, IntoConnectionInfo,
    RedisConnectionInfo, RedisResult,
};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::domain::cache::{
    escape_redis_glob, glob_to_redis, Cache, CacheSettings, Jitter, KeyStream, SetOptions,
};
use crate::domain::DomainError;

/// Where the Redis deployment lives
#[derive(Debug, Clone, PartialEq)]
pub enum RedisTopology {
    /// A single node, e.g. "redis://127.0.0.1:6379"
    Single(String),
    /// Seed nodes of a cluster
    Cluster(Vec<String>),
}

/// Configuration for Redis cache
#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    pub topology: RedisTopology,
    /// Key prefix for namespacing
    pub key_prefix: String,
    /// Default TTL for entries without explicit TTL
    pub default_ttl: Option<Duration>,
    /// Default jitter applied to TTLs
    pub default_jitter: Jitter,
    /// `COUNT` hint for each `SCAN` call
    pub scan_count: usize,
    /// Upper bound on establishing any connection, retries included
    pub connection_timeout: Duration,
    /// Reconnect attempts made by the connection manager
    pub connection_retries: usize,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            topology: RedisTopology::Single("redis://127.0.0.1:6379".to_string()),
            key_prefix: String::new(),
            default_ttl: None,
            default_jitter: Jitter::default(),
            scan_count: 100,
            connection_timeout: Duration::from_secs(5),
            connection_retries: 1,
        }
    }
}

impl RedisCacheConfig {
    /// Creates a single-node configuration with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            topology: RedisTopology::Single(url.into()),
            ..Default::default()
        }
    }

    /// Creates a cluster configuration from seed node URLs
    pub fn cluster<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topology: RedisTopology::Cluster(nodes.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// Sets the default TTL
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Sets the default jitter
    pub fn with_default_jitter(mut self, jitter: impl Into<Jitter>) -> Self {
        self.default_jitter = jitter.into();
        self
    }

    /// Sets the key prefix
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_scan_count(mut self, count: usize) -> Self {
        self.scan_count = count.max(1);
        self
    }

    /// Sets the connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_connection_retries(mut self, retries: usize) -> Self {
        self.connection_retries = retries;
        self
    }
}

#[derive(Clone)]
enum RedisClient {
    Single(Client),
    Cluster {
        client: ClusterClient,
        /// Credentials and db used for direct connections to each master
        node_auth: RedisConnectionInfo,
    },
}

#[derive(Clone)]
enum RedisConnection {
    Single(ConnectionManager),
    Cluster(ClusterConnection),
}

impl RedisConnection {
    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> RedisResult<T> {
        match self {
            Self::Single(conn) => cmd.query_async(&mut conn.clone()).await,
            Self::Cluster(conn) => cmd.query_async(&mut conn.clone()).await,
        }
    }
}

/// A connection that owns a slice of the keyspace and can be scanned
enum ScanNode {
    Managed(ConnectionManager),
    Direct(MultiplexedConnection),
}

impl ScanNode {
    async fn scan(
        &mut self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> RedisResult<(u64, Vec<String>)> {
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count);

        match self {
            Self::Managed(conn) => cmd.query_async(conn).await,
            Self::Direct(conn) => cmd.query_async(conn).await,
        }
    }

    /// One `DEL` per key so cluster nodes never see a cross-slot command
    async fn delete(&mut self, keys: &[String]) -> RedisResult<()> {
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.del(key).ignore();
        }

        match self {
            Self::Managed(conn) => pipe.query_async(conn).await,
            Self::Direct(conn) => pipe.query_async(conn).await,
        }
    }
}

struct ScanState {
    nodes: Option<Vec<ScanNode>>,
    index: usize,
    cursor: u64,
    buffer: VecDeque<String>,
}

/// Redis cache implementation
///
/// Features:
/// - One lazily established connection per cache root
/// - JSON-encoded values; undecodable values read as missing
/// - Best-effort writes: failed `set` calls are logged, not returned
/// - `SCAN`-based enumeration, fanned out to every master of a cluster
#[derive(Clone)]
pub struct RedisCache {
    client: RedisClient,
    connection: Arc<OnceCell<RedisConnection>>,
    settings: CacheSettings,
    scan_count: usize,
    connection_timeout: Duration,
    connection_retries: usize,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topology = match &self.client {
            RedisClient::Single(_) => "single",
            RedisClient::Cluster { .. } => "cluster",
        };

        f.debug_struct("RedisCache")
            .field("topology", &topology)
            .field("settings", &self.settings)
            .field("connection_timeout", &self.connection_timeout)
            .field("connected", &self.connection.initialized())
            .finish()
    }
}

impl RedisCache {
    /// Creates a Redis cache; the connection is opened on first use
    pub fn new(config: RedisCacheConfig) -> Result<Self, DomainError> {
        let client = match &config.topology {
            RedisTopology::Single(url) => RedisClient::Single(
                Client::open(url.as_str()).map_err(|e| {
                    DomainError::configuration(format!("Invalid Redis URL '{}': {}", url, e))
                })?,
            ),
            RedisTopology::Cluster(nodes) => {
                let seed = nodes.first().ok_or_else(|| {
                    DomainError::configuration("Redis cluster requires at least one node")
                })?;
                let node_auth = seed
                    .as_str()
                    .into_connection_info()
                    .map_err(|e| {
                        DomainError::configuration(format!("Invalid Redis URL '{}': {}", seed, e))
                    })?
                    .redis;
                let client = ClusterClient::builder(nodes.clone())
                    .connection_timeout(config.connection_timeout)
                    .retries(config.connection_retries as u32)
                    .build()
                    .map_err(|e| {
                        DomainError::configuration(format!("Invalid Redis cluster nodes: {}", e))
                    })?;

                RedisClient::Cluster { client, node_auth }
            }
        };

        let settings = CacheSettings::new(config.key_prefix)
            .with_default_ttl(config.default_ttl)
            .with_default_jitter(config.default_jitter);

        Ok(Self {
            client,
            connection: Arc::new(OnceCell::new()),
            settings,
            scan_count: config.scan_count.max(1),
            connection_timeout: config.connection_timeout,
            connection_retries: config.connection_retries,
        })
    }

    /// Creates a single-node Redis cache with default configuration
    pub fn with_url(url: impl Into<String>) -> Result<Self, DomainError> {
        Self::new(RedisCacheConfig::new(url))
    }

    /// Returns the shared connection, connecting on first use
    ///
    /// A failed attempt is not cached; the next call tries again, again
    /// bounded by `connection_timeout`.
    async fn connection(&self) -> Result<RedisConnection, DomainError> {
        self.connection
            .get_or_try_init(|| async {
                debug!(prefix = %self.settings.key_prefix, "Connecting to Redis");

                match &self.client {
                    RedisClient::Single(client) => {
                        let manager_config = ConnectionManagerConfig::new()
                            .set_connection_timeout(self.connection_timeout)
                            .set_number_of_retries(self.connection_retries);

                        connect_within(
                            self.connection_timeout,
                            "Redis",
                            ConnectionManager::new_with_config(client.clone(), manager_config),
                        )
                        .await
                        .map(RedisConnection::Single)
                    }
                    RedisClient::Cluster { client, .. } => connect_within(
                        self.connection_timeout,
                        "Redis cluster",
                        client.get_async_connection(),
                    )
                    .await
                    .map(RedisConnection::Cluster),
                }
            })
            .await
            .cloned()
    }

    /// Checks connectivity with `PING`
    pub async fn ping(&self) -> Result<(), DomainError> {
        let conn = self.connection().await?;
        let _: String = conn
            .query(&redis::cmd("PING"))
            .await
            .map_err(|e| DomainError::cache(format!("Redis ping failed: {}", e)))?;
        Ok(())
    }

    /// Connections covering the whole keyspace: the node itself, or every
    /// cluster master reachable from `CLUSTER NODES`
    async fn scan_nodes(&self) -> Result<Vec<ScanNode>, DomainError> {
        let connection = self.connection().await?;

        match (&self.client, connection) {
            (RedisClient::Single(_), RedisConnection::Single(conn)) => {
                Ok(vec![ScanNode::Managed(conn)])
            }
            (RedisClient::Cluster { node_auth, .. }, conn @ RedisConnection::Cluster(_)) => {
                let nodes: String = conn
                    .query(redis::cmd("CLUSTER").arg("NODES"))
                    .await
                    .map_err(|e| DomainError::cache(format!("Failed to list cluster nodes: {}", e)))?;

                let mut scan_nodes = Vec::new();
                for (host, port) in parse_cluster_masters(&nodes) {
                    let info = ConnectionInfo {
                        addr: ConnectionAddr::Tcp(host.clone(), port),
                        redis: node_auth.clone(),
                    };
                    let client = Client::open(info).map_err(|e| {
                        DomainError::cache(format!("Invalid master address {}:{}: {}", host, port, e))
                    })?;
                    let conn = connect_within(
                        self.connection_timeout,
                        &format!("master {}:{}", host, port),
                        client.get_multiplexed_async_connection(),
                    )
                    .await?;
                    scan_nodes.push(ScanNode::Direct(conn));
                }

                debug!(masters = scan_nodes.len(), "Resolved Redis cluster masters");
                Ok(scan_nodes)
            }
            _ => Err(DomainError::internal("Redis client and connection topology differ")),
        }
    }

    /// Streams fully-qualified keys matching a Redis `MATCH` pattern
    fn scan<'a>(&'a self, pattern: String) -> KeyStream<'a> {
        let state = ScanState {
            nodes: None,
            index: 0,
            cursor: 0,
            buffer: VecDeque::new(),
        };

        futures::stream::try_unfold(state, move |mut state| {
            let pattern = pattern.clone();
            async move {
                loop {
                    if let Some(key) = state.buffer.pop_front() {
                        return Ok::<_, DomainError>(Some((key, state)));
                    }

                    if state.nodes.is_none() {
                        state.nodes = Some(self.scan_nodes().await?);
                    }

                    let Some(node) = state
                        .nodes
                        .as_mut()
                        .and_then(|nodes| nodes.get_mut(state.index))
                    else {
                        return Ok(None);
                    };

                    let (next, keys) = node
                        .scan(state.cursor, &pattern, self.scan_count)
                        .await
                        .map_err(|e| {
                            DomainError::cache(format!(
                                "Failed to scan keys with pattern '{}': {}",
                                pattern, e
                            ))
                        })?;

                    state.buffer.extend(keys);
                    if next == 0 {
                        state.index += 1;
                        state.cursor = 0;
                    } else {
                        state.cursor = next;
                    }
                }
            }
        })
        .boxed()
    }

    /// Deletes every key matching a Redis `MATCH` pattern, node by node
    async fn delete_matching(&self, pattern: &str) -> Result<usize, DomainError> {
        let mut deleted = 0usize;

        for mut node in self.scan_nodes().await? {
            let mut cursor = 0u64;
            loop {
                let (next, keys) = node
                    .scan(cursor, pattern, self.scan_count)
                    .await
                    .map_err(|e| {
                        DomainError::cache(format!(
                            "Failed to scan keys with pattern '{}': {}",
                            pattern, e
                        ))
                    })?;

                if !keys.is_empty() {
                    node.delete(&keys)
                        .await
                        .map_err(|e| DomainError::cache(format!("Failed to delete keys: {}", e)))?;
                    deleted += keys.len();
                }

                cursor = next;
                if cursor == 0 {
                    break;
                }
            }
        }

        debug!(pattern = %pattern, deleted, "Deleted Redis keys");
        Ok(deleted)
    }
}

/// Awaits a connection attempt, failing once `timeout` elapses
async fn connect_within<T>(
    timeout: Duration,
    target: &str,
    connect: impl Future<Output = RedisResult<T>>,
) -> Result<T, DomainError> {
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(connection)) => Ok(connection),
        Ok(Err(e)) => Err(DomainError::cache(format!(
            "Failed to connect to {}: {}",
            target, e
        ))),
        Err(_) => Err(DomainError::cache(format!(
            "Timed out connecting to {} after {:?}",
            target, timeout
        ))),
    }
}

/// Whole seconds sent as `EX`, never below one
fn ttl_seconds(ttl: Duration) -> u64 {
    (ttl.as_secs_f64().round() as u64).max(1)
}

/// Extracts healthy master addresses from `CLUSTER NODES` output
fn parse_cluster_masters(nodes: &str) -> Vec<(String, u16)> {
    nodes
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _id = fields.next()?;
            let address = fields.next()?;
            let flags = fields.next()?;

            let flags: Vec<&str> = flags.split(',').collect();
            if !flags.contains(&"master")
                || flags
                    .iter()
                    .any(|f| matches!(*f, "fail" | "fail?" | "noaddr" | "handshake"))
            {
                return None;
            }

            let address = address.split(['@', ',']).next()?;
            let (host, port) = address.rsplit_once(':')?;
            let port: u16 = port.parse().ok()?;
            if host.is_empty() || port == 0 {
                return None;
            }

            Some((host.to_string(), port))
        })
        .collect()
}

#[async_trait]
impl Cache for RedisCache {
    type Value = Value;

    fn key_prefix(&self) -> &str {
        &self.settings.key_prefix
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, DomainError> {
        let full_key = self.settings.full_key(key);
        let conn = self.connection().await?;

        let raw: Option<String> = conn
            .query(redis::cmd("GET").arg(&full_key))
            .await
            .map_err(|e| DomainError::cache(format!("Failed to get key '{}': {}", key, e)))?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key = %full_key, error = %e, "Discarding undecodable cache value");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Value, options: SetOptions) -> Result<(), DomainError> {
        let full_key = self.settings.full_key(key);
        let data = serde_json::to_string(&value)?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(&full_key).arg(data);
        if let Some(ttl) = self.settings.effective_ttl(&options) {
            cmd.arg("EX").arg(ttl_seconds(ttl));
        }

        let result = async {
            let conn = self.connection().await?;
            conn.query::<()>(&cmd)
                .await
                .map_err(|e| DomainError::cache(format!("Failed to set key '{}': {}", key, e)))
        }
        .await;

        if let Err(e) = result {
            warn!(key = %full_key, error = %e, "Cache write failed");
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DomainError> {
        let conn = self.connection().await?;

        conn.query::<i64>(redis::cmd("DEL").arg(self.settings.full_key(key)))
            .await
            .map_err(|e| DomainError::cache(format!("Failed to delete key '{}': {}", key, e)))?;

        Ok(())
    }

    fn keys<'a>(&'a self, prefix: Option<&'a str>) -> KeyStream<'a> {
        let pattern = format!(
            "{}*",
            escape_redis_glob(&self.settings.full_key(prefix.unwrap_or("")))
        );

        self.scan(pattern)
            .map_ok(move |key| match self.settings.strip_prefix(&key) {
                Some(logical) => logical.to_string(),
                None => key,
            })
            .boxed()
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<(), DomainError> {
        let pattern = format!(
            "{}*",
            escape_redis_glob(&self.settings.full_key(prefix.unwrap_or("")))
        );
        self.delete_matching(&pattern).await?;
        Ok(())
    }

    async fn clear_pattern(&self, pattern: &str) -> Result<(), DomainError> {
        let pattern = format!(
            "{}{}",
            escape_redis_glob(&self.settings.key_prefix),
            glob_to_redis(pattern)
        );
        self.delete_matching(&pattern).await?;
        Ok(())
    }

    fn child_shared(&self, prefix: &str) -> Arc<dyn Cache<Value = Value>> {
        Arc::new(self.child(prefix))
    }

    fn child(&self, prefix: &str) -> Self {
        Self {
            client: self.client.clone(),
            connection: Arc::new(OnceCell::new()),
            settings: self.settings.child(prefix),
            scan_count: self.scan_count,
            connection_timeout: self.connection_timeout,
            connection_retries: self.connection_retries,
        }
    }
}
