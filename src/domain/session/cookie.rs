//! Cookie collaborator used by sessions

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// `SameSite` cookie attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SameSite::Strict => write!(f, "Strict"),
            SameSite::Lax => write!(f, "Lax"),
            SameSite::None => write!(f, "None"),
        }
    }
}

/// Cookie attributes, passed through verbatim to the cookie jar
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CookieOptions {
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: Option<Duration>,
    pub expires: Option<DateTime<Utc>>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<SameSite>,
}

impl CookieOptions {
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    /// Renders a `Set-Cookie` header value
    pub fn to_set_cookie(&self, name: &str, value: &str) -> String {
        let mut header = format!("{}={}", name, value);

        if let Some(path) = &self.path {
            header.push_str(&format!("; Path={}", path));
        }
        if let Some(domain) = &self.domain {
            header.push_str(&format!("; Domain={}", domain));
        }
        if let Some(max_age) = self.max_age {
            header.push_str(&format!("; Max-Age={}", max_age.as_secs()));
        }
        if let Some(expires) = self.expires {
            header.push_str(&format!(
                "; Expires={}",
                expires.format("%a, %d %b %Y %H:%M:%S GMT")
            ));
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        if self.secure {
            header.push_str("; Secure");
        }
        if let Some(same_site) = self.same_site {
            header.push_str(&format!("; SameSite={}", same_site));
        }

        header
    }
}

/// Read/write access to request and response cookies
pub trait CookieJar: Send {
    /// Returns the request cookie value for `name`
    fn get(&self, name: &str) -> Option<String>;

    /// Queues a response cookie
    fn set(&mut self, name: &str, value: &str, options: &CookieOptions);
}

/// Cookie jar over a plain map; pending writes are also readable
#[derive(Debug, Clone, Default)]
pub struct MemoryCookieJar {
    cookies: HashMap<String, String>,
    written: Vec<(String, String, CookieOptions)>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a `Cookie` request header (`a=1; b=2`)
    pub fn from_header(header: &str) -> Self {
        let cookies = header
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some((name.to_string(), value.trim().trim_matches('"').to_string()))
            })
            .collect();

        Self {
            cookies,
            written: Vec::new(),
        }
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    /// Cookies written since construction, in order
    pub fn written(&self) -> &[(String, String, CookieOptions)] {
        &self.written
    }

    /// `Set-Cookie` header values for the written cookies
    pub fn set_cookie_headers(&self) -> Vec<String> {
        self.written
            .iter()
            .map(|(name, value, options)| options.to_set_cookie(name, value))
            .collect()
    }
}

impl CookieJar for MemoryCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        self.cookies.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: &str, options: &CookieOptions) {
        self.cookies.insert(name.to_string(), value.to_string());
        self.written
            .push((name.to_string(), value.to_string(), options.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_cookie_header() {
        let jar = MemoryCookieJar::from_header("sid=abc123; theme=\"dark\"; =skip; broken");
        assert_eq!(jar.get("sid"), Some("abc123".to_string()));
        assert_eq!(jar.get("theme"), Some("dark".to_string()));
        assert_eq!(jar.get("broken"), None);
    }

    #[test]
    fn test_set_records_write() {
        let mut jar = MemoryCookieJar::new();
        let options = CookieOptions::default().with_path("/");
        jar.set("sid", "xyz", &options);

        assert_eq!(jar.get("sid"), Some("xyz".to_string()));
        assert_eq!(jar.written().len(), 1);
        assert_eq!(jar.written()[0].2, options);
    }

    #[test]
    fn test_set_cookie_rendering() {
        let options = CookieOptions::default()
            .with_path("/")
            .with_domain("example.com")
            .with_max_age(Duration::from_secs(3600))
            .with_expires(Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap())
            .http_only(true)
            .secure(true)
            .with_same_site(SameSite::Lax);

        assert_eq!(
            options.to_set_cookie("sid", "abc"),
            "sid=abc; Path=/; Domain=example.com; Max-Age=3600; \
             Expires=Wed, 02 Jan 2030 03:04:05 GMT; HttpOnly; Secure; SameSite=Lax"
        );
    }

    #[test]
    fn test_minimal_rendering() {
        assert_eq!(CookieOptions::default().to_set_cookie("a", "b"), "a=b");
    }
}
