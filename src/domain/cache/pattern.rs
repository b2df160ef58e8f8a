//! Glob matching for cache keys
//!
//! Only `*` is special; it matches any run of characters. Everything else is
//! literal and the pattern is anchored at both ends.

use regex::Regex;

use crate::domain::DomainError;

/// A compiled key glob
#[derive(Debug, Clone)]
pub struct KeyPattern {
    glob: String,
    regex: Regex,
}

impl KeyPattern {
    /// Compiles a glob into a matcher
    pub fn new(glob: &str) -> Result<Self, DomainError> {
        let body = glob
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");

        let regex = Regex::new(&format!("^{}$", body))
            .map_err(|e| DomainError::validation(format!("Invalid pattern '{}': {}", glob, e)))?;

        Ok(Self {
            glob: glob.to_string(),
            regex,
        })
    }

    /// Returns true when `key` matches the whole pattern
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    /// The source glob
    pub fn as_str(&self) -> &str {
        &self.glob
    }
}

/// Escapes Redis glob metacharacters so the text matches literally in `SCAN MATCH`
pub fn escape_redis_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Converts a key glob into a Redis `MATCH` pattern, keeping `*` as the only wildcard
pub fn glob_to_redis(glob: &str) -> String {
    glob.split('*')
        .map(escape_redis_glob)
        .collect::<Vec<_>>()
        .join("*")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_matches_any_run() {
        let pattern = KeyPattern::new("user:*:profile").unwrap();
        assert!(pattern.matches("user:1:profile"));
        assert!(pattern.matches("user::profile"));
        assert!(pattern.matches("user:a:b:profile"));
        assert!(!pattern.matches("user:1:settings"));
    }

    #[test]
    fn test_anchored_both_ends() {
        let pattern = KeyPattern::new("abc").unwrap();
        assert!(pattern.matches("abc"));
        assert!(!pattern.matches("xabc"));
        assert!(!pattern.matches("abcx"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let pattern = KeyPattern::new("a.b+(c)?*").unwrap();
        assert!(pattern.matches("a.b+(c)?tail"));
        assert!(!pattern.matches("aXb+(c)?tail"));
    }

    #[test]
    fn test_glob_to_redis_escapes_specials() {
        assert_eq!(glob_to_redis("sess[1]?:*"), "sess\\[1\\]\\?:*");
        assert_eq!(escape_redis_glob("a*b"), "a\\*b");
    }
}
