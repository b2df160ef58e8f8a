//! Cache entries, per-instance settings and write options

use std::time::Duration;

use chrono::Utc;

use super::jitter::Jitter;

/// Current time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A stored value with its absolute expiration
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    /// Expiration timestamp (millis since epoch), `None` never expires
    pub expires_at: Option<i64>,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, expires_at: Option<i64>) -> Self {
        Self { value, expires_at }
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }
}

/// Options for a single `set` call
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Time to live; falls back to the instance default
    pub ttl: Option<Duration>,
    /// Jitter applied to the TTL; falls back to the instance default
    pub jitter: Option<Jitter>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options with the given TTL and the default jitter
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            jitter: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_jitter(mut self, jitter: impl Into<Jitter>) -> Self {
        self.jitter = Some(jitter.into());
        self
    }
}

/// Settings shared by every backend: namespace and expiration defaults
#[derive(Debug, Clone, Default)]
pub struct CacheSettings {
    pub key_prefix: String,
    pub default_ttl: Option<Duration>,
    pub default_jitter: Jitter,
}

impl CacheSettings {
    pub fn new(key_prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            ..Default::default()
        }
    }

    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_default_jitter(mut self, jitter: impl Into<Jitter>) -> Self {
        self.default_jitter = jitter.into();
        self
    }

    /// Settings for a child view: same defaults, composed prefix
    pub fn child(&self, prefix: &str) -> Self {
        Self {
            key_prefix: format!("{}{}", self.key_prefix, prefix),
            default_ttl: self.default_ttl,
            default_jitter: self.default_jitter.clone(),
        }
    }

    /// Fully-qualified key for a logical key
    pub fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Logical key for a fully-qualified key, if it belongs to this namespace
    pub fn strip_prefix<'a>(&self, full_key: &'a str) -> Option<&'a str> {
        full_key.strip_prefix(self.key_prefix.as_str())
    }

    /// The jittered TTL for a write, `None` when the entry never expires
    pub fn effective_ttl(&self, options: &SetOptions) -> Option<Duration> {
        let ttl = options.ttl.or(self.default_ttl)?;
        let jitter = options.jitter.as_ref().unwrap_or(&self.default_jitter);
        let secs = jitter.apply(ttl.as_secs_f64());

        Some(Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(ttl))
    }

    /// Absolute expiry (epoch millis) for a write made now
    pub fn expires_at(&self, options: &SetOptions) -> Option<i64> {
        self.effective_ttl(options)
            .map(|ttl| now_millis() + ttl.as_millis() as i64)
    }
}
