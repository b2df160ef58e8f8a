//! Session service binding a cache and cookie settings

use tracing::{debug, info};

use crate::domain::cache::Cache;
use crate::domain::session::{CookieJar, Session, SessionOptions};
use crate::domain::DomainError;
use crate::infrastructure::cache::SharedCache;

/// Loads, persists and regenerates sessions against one cache
#[derive(Debug, Clone)]
pub struct SessionService {
    cache: SharedCache,
    options: SessionOptions,
}

impl SessionService {
    pub fn new(cache: SharedCache, options: SessionOptions) -> Self {
        info!(
            cookie = %options.cookie_name,
            prefix = %cache.key_prefix(),
            "Session service initialized"
        );
        Self { cache, options }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    /// Resolves the request's session from its cookie
    pub async fn load<J>(&self, jar: &mut J) -> Result<Session, DomainError>
    where
        J: CookieJar + ?Sized,
    {
        Session::load(self.cache.as_ref(), jar, &self.options).await
    }

    /// Writes the session back if it changed
    pub async fn persist(&self, session: &mut Session) -> bool {
        session.persist(self.cache.as_ref(), &self.options).await
    }

    /// Drops the stored data and swaps in a new, empty session with a new id
    ///
    /// The old entry is deleted immediately; the new id is sent as a cookie and
    /// stored when the session is next persisted.
    pub async fn regenerate<J>(&self, session: &mut Session, jar: &mut J) -> Result<(), DomainError>
    where
        J: CookieJar + ?Sized,
    {
        if !session.is_new() {
            self.cache.delete(session.id()).await?;
        }

        let previous = std::mem::take(session);
        jar.set(&self.options.cookie_name, session.id(), &self.options.cookie);
        debug!(old = %previous.id(), new = %session.id(), "Session regenerated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};

    use crate::domain::session::MemoryCookieJar;
    use crate::infrastructure::cache::{InMemoryCache, InMemoryCacheConfig};

    fn service() -> SessionService {
        let cache = InMemoryCache::<Value>::with_config(
            InMemoryCacheConfig::default().with_key_prefix("sess:"),
        );
        SessionService::new(
            Arc::new(cache),
            SessionOptions::default().with_ttl(Some(Duration::from_secs(60))),
        )
    }

    #[tokio::test]
    async fn test_request_cycle_round_trips_data() {
        let service = service();

        let mut jar = MemoryCookieJar::new();
        let mut session = service.load(&mut jar).await.unwrap();
        assert!(session.is_new());
        session.write("user", &json!({"id": 7})).unwrap();
        assert!(service.persist(&mut session).await);

        let cookie = jar.get("sid").unwrap();
        assert_eq!(cookie, session.id());

        let mut next_jar = MemoryCookieJar::new().with_cookie("sid", cookie.clone());
        let mut restored = service.load(&mut next_jar).await.unwrap();
        assert!(!restored.is_new());
        assert_eq!(restored.read("user"), Some(json!({"id": 7})));
        assert!(next_jar.written().is_empty());

        assert!(!service.persist(&mut restored).await);
    }

    #[tokio::test]
    async fn test_session_stored_under_cache_prefix() {
        let service = service();
        let mut jar = MemoryCookieJar::new();
        let mut session = service.load(&mut jar).await.unwrap();
        session.write("k", &1).unwrap();
        service.persist(&mut session).await;

        let stored = service.cache().get(session.id()).await.unwrap();
        assert_eq!(stored, Some(json!({"k": 1})));
        assert_eq!(service.cache().key_prefix(), "sess:");
    }

    #[tokio::test]
    async fn test_regenerate_replaces_id_and_drops_entry() {
        let service = service();
        let mut jar = MemoryCookieJar::new();
        let mut session = service.load(&mut jar).await.unwrap();
        session.write("k", &1).unwrap();
        service.persist(&mut session).await;
        let old_id = session.id().to_string();

        let mut jar = MemoryCookieJar::new().with_cookie("sid", old_id.clone());
        let mut session = service.load(&mut jar).await.unwrap();
        service.regenerate(&mut session, &mut jar).await.unwrap();

        assert_ne!(session.id(), old_id);
        assert!(session.is_new());
        assert!(session.is_empty());
        assert_eq!(jar.get("sid").as_deref(), Some(session.id()));
        assert!(service.cache().get(&old_id).await.unwrap().is_none());
    }
}
