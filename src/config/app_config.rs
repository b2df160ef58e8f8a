use std::time::Duration;

use serde::Deserialize;

use crate::domain::cache::JitterPolicy;
use crate::domain::session::{CookieOptions, SameSite, SessionOptions};
use crate::domain::DomainError;
use crate::infrastructure::cache::{CacheConfig, CacheType};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub cache: CacheSection,
    pub session: SessionSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// `[cache]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// `memory`, `redis` or `object_store`
    pub backend: String,
    pub key_prefix: String,
    pub default_ttl_secs: Option<u64>,
    /// `none`, `full` or `equal`
    pub default_jitter: String,
    /// Soft entry limit for the memory backend, 0 disables it
    pub max_items: usize,
    pub redis_url: Option<String>,
    pub redis_cluster_nodes: Vec<String>,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
}

/// `[session]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub cookie_name: String,
    /// Stored session lifetime; 0 keeps sessions until removed
    pub ttl_secs: u64,
    /// Sub-namespace appended to the cache prefix
    pub key_prefix: String,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            key_prefix: String::new(),
            default_ttl_secs: None,
            default_jitter: "none".to_string(),
            max_items: 10_000,
            redis_url: None,
            redis_cluster_nodes: Vec::new(),
            bucket: None,
            region: None,
            endpoint_url: None,
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            cookie_name: "sid".to_string(),
            ttl_secs: 86_400,
            key_prefix: "session:".to_string(),
            path: "/".to_string(),
            domain: None,
            secure: false,
            http_only: true,
            same_site: Some(SameSite::Lax),
        }
    }
}

impl CacheSection {
    /// Converts to the cache factory configuration
    pub fn to_cache_config(&self) -> Result<CacheConfig, DomainError> {
        let cache_type: CacheType = self.backend.parse()?;

        Ok(CacheConfig {
            cache_type,
            key_prefix: self.key_prefix.clone(),
            default_ttl: self.default_ttl_secs.map(Duration::from_secs),
            default_jitter: JitterPolicy::from_name(&self.default_jitter),
            max_items: (self.max_items > 0).then_some(self.max_items),
            redis_url: self.redis_url.clone(),
            redis_cluster_nodes: self.redis_cluster_nodes.clone(),
            bucket: self.bucket.clone(),
            region: self.region.clone(),
            endpoint_url: self.endpoint_url.clone(),
        })
    }
}

impl SessionSection {
    /// Converts to session options; the cookie lifetime follows `ttl_secs`
    pub fn to_session_options(&self) -> SessionOptions {
        let ttl = (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs));

        let mut cookie = CookieOptions::default()
            .with_path(self.path.clone())
            .http_only(self.http_only)
            .secure(self.secure);
        if let Some(domain) = &self.domain {
            cookie = cookie.with_domain(domain.clone());
        }
        if let Some(same_site) = self.same_site {
            cookie = cookie.with_same_site(same_site);
        }
        if let Some(ttl) = ttl {
            cookie = cookie.with_max_age(ttl);
        }

        SessionOptions::default()
            .with_cookie_name(self.cookie_name.clone())
            .with_cookie(cookie)
            .with_ttl(ttl)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cache.redis_cluster_nodes")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.cache.backend, "memory");
        assert_eq!(config.session.cookie_name, "sid");
    }

    #[test]
    fn test_cache_section_conversion() {
        let section = CacheSection {
            backend: "redis".to_string(),
            key_prefix: "app:".to_string(),
            default_ttl_secs: Some(120),
            default_jitter: "equal".to_string(),
            max_items: 0,
            redis_url: Some("redis://localhost".to_string()),
            ..Default::default()
        };

        let config = section.to_cache_config().unwrap();
        assert_eq!(config.cache_type, CacheType::Redis);
        assert_eq!(config.default_ttl, Some(Duration::from_secs(120)));
        assert_eq!(config.default_jitter, JitterPolicy::Equal);
        assert_eq!(config.max_items, None);
    }

    #[test]
    fn test_unknown_jitter_name_falls_back_to_none() {
        let section = CacheSection {
            default_jitter: "wobbly".to_string(),
            ..Default::default()
        };
        let config = tokio_test::assert_ok!(section.to_cache_config());
        assert_eq!(config.default_jitter, JitterPolicy::None);
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let section = CacheSection {
            backend: "memcached".to_string(),
            ..Default::default()
        };
        tokio_test::assert_err!(section.to_cache_config());
    }

    #[test]
    fn test_session_section_conversion() {
        let section = SessionSection {
            domain: Some("example.com".to_string()),
            secure: true,
            ttl_secs: 600,
            ..Default::default()
        };

        let options = section.to_session_options();
        assert_eq!(options.ttl, Some(Duration::from_secs(600)));
        assert_eq!(
            options.cookie.to_set_cookie("sid", "x"),
            "sid=x; Path=/; Domain=example.com; Max-Age=600; HttpOnly; Secure; SameSite=Lax"
        );
    }

    #[test]
    fn test_session_without_ttl() {
        let section = SessionSection {
            ttl_secs: 0,
            ..Default::default()
        };
        let options = section.to_session_options();
        assert_eq!(options.ttl, None);
        assert_eq!(options.cookie.max_age, None);
    }

    #[test]
    fn test_deserialize_partial_sections() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "cache": { "backend": "s3", "bucket": "sessions" },
            "session": { "same_site": "strict" }
        }))
        .unwrap();

        assert_eq!(config.cache.bucket.as_deref(), Some("sessions"));
        assert_eq!(config.cache.max_items, 10_000);
        assert_eq!(config.session.same_site, Some(SameSite::Strict));
        assert_eq!(config.server.port, 8080);
    }
}
