//! Session entity: a dirty-tracked bag of JSON values keyed by a cookie id

use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use super::cookie::{CookieJar, CookieOptions};
use crate::domain::cache::{Cache, SetOptions};
use crate::domain::DomainError;

/// Number of random bytes in a session id
const SESSION_ID_BYTES: usize = 32;

/// Generates a new session id: OS-random bytes, lowercase hex
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Returns true when `id` has the shape of a generated session id
pub fn is_valid_session_id(id: &str) -> bool {
    id.len() == SESSION_ID_BYTES * 2 && id.bytes().all(|b| b.is_ascii_hexdigit())
}

/// How sessions are carried in cookies and stored in the cache
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub cookie_name: String,
    pub cookie: CookieOptions,
    /// Cache TTL for persisted sessions, `None` never expires
    pub ttl: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            cookie_name: "sid".to_string(),
            cookie: CookieOptions::default().with_path("/").http_only(true),
            ttl: Some(Duration::from_secs(86_400)),
        }
    }
}

impl SessionOptions {
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    pub fn with_cookie(mut self, cookie: CookieOptions) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Request-scoped session data
///
/// Values go in through `write` as owned JSON trees and come out of `read` as
/// clones, so caller-side mutation never leaks into the session or back.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    id: String,
    data: Map<String, Value>,
    dirty: bool,
    is_new: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A fresh session with a new id; new and dirty
    pub fn new() -> Self {
        Self {
            id: generate_session_id(),
            data: Map::new(),
            dirty: true,
            is_new: true,
        }
    }

    /// A session restored from storage; neither new nor dirty
    pub fn restore(id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            data,
            dirty: false,
            is_new: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    /// Snapshot of all session data
    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone())
    }

    /// Returns a copy of the value stored at `key`
    pub fn read(&self, key: &str) -> Option<Value> {
        self.data.get(key).cloned()
    }

    /// Reads and deserializes the value stored at `key`
    pub fn read_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, DomainError> {
        self.data
            .get(key)
            .map(|v| T::deserialize(v))
            .transpose()
            .map_err(|e| {
                DomainError::serialization(format!("Failed to read session key '{}': {}", key, e))
            })
    }

    pub fn check(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Stores a copy of `value`; a value serializing to `null` removes the key
    pub fn write<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), DomainError> {
        let value = serde_json::to_value(value).map_err(|e| {
            DomainError::serialization(format!("Failed to write session key '{}': {}", key, e))
        })?;

        if value.is_null() {
            self.data.remove(key);
        } else {
            self.data.insert(key.to_string(), value);
        }
        self.dirty = true;
        Ok(())
    }

    pub fn delete(&mut self, key: &str) {
        self.data.remove(key);
        self.dirty = true;
    }

    /// Removes and returns the value at `key`
    pub fn consume(&mut self, key: &str) -> Option<Value> {
        let value = self.data.remove(key);
        if value.is_some() {
            self.dirty = true;
        }
        value
    }

    /// Returns the stored value, or stores and returns the factory's value
    ///
    /// A factory value serializing to `null` is returned but not stored, and
    /// leaves the session clean.
    pub fn remember<T, F>(&mut self, key: &str, factory: F) -> Result<T, DomainError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.read_as::<T>(key)? {
            return Ok(existing);
        }

        let value = factory();
        let encoded = serde_json::to_value(&value).map_err(|e| {
            DomainError::serialization(format!("Failed to write session key '{}': {}", key, e))
        })?;

        if !encoded.is_null() {
            self.data.insert(key.to_string(), encoded);
            self.dirty = true;
        }
        Ok(value)
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.dirty = true;
    }

    /// Resolves the session for a request
    ///
    /// A missing or malformed cookie, or an id without a stored entry, yields a
    /// new session whose id is written back to the jar. A cache read failure is
    /// returned as [`DomainError::Session`].
    pub async fn load<C, J>(
        cache: &C,
        jar: &mut J,
        options: &SessionOptions,
    ) -> Result<Self, DomainError>
    where
        C: Cache<Value = Value> + ?Sized,
        J: CookieJar + ?Sized,
    {
        if let Some(id) = jar.get(&options.cookie_name) {
            if is_valid_session_id(&id) {
                let stored = cache.get(&id).await.map_err(|e| {
                    DomainError::session(format!("Failed to load session: {}", e))
                })?;

                match stored {
                    Some(Value::Object(data)) => {
                        debug!(session_id = %id, keys = data.len(), "Session restored");
                        return Ok(Self::restore(id, data));
                    }
                    Some(_) => {
                        warn!(session_id = %id, "Stored session is not an object, starting a new one");
                    }
                    None => {
                        debug!(session_id = %id, "Session not found, starting a new one");
                    }
                }
            } else {
                debug!("Ignoring malformed session cookie");
            }
        }

        let session = Self::new();
        jar.set(&options.cookie_name, &session.id, &options.cookie);
        debug!(session_id = %session.id, "Session created");
        Ok(session)
    }

    /// Writes the session back if it changed; returns whether it was written
    ///
    /// A failed write is logged and the session stays dirty.
    pub async fn persist<C>(&mut self, cache: &C, options: &SessionOptions) -> bool
    where
        C: Cache<Value = Value> + ?Sized,
    {
        if !self.dirty {
            return false;
        }

        let set_options = SetOptions {
            ttl: options.ttl,
            jitter: None,
        };

        match cache.set(&self.id, self.to_value(), set_options).await {
            Ok(()) => {
                self.dirty = false;
                debug!(session_id = %self.id, "Session persisted");
                true
            }
            Err(e) => {
                error!(session_id = %self.id, error = %e, "Failed to persist session");
                false
            }
        }
    }
}
