//! Cache command - key listing and bulk deletion against the configured backend

use std::io::Write;

use clap::Subcommand;
use futures::TryStreamExt;
use tracing::info;

use crate::config::AppConfig;
use crate::domain::cache::Cache;
use crate::infrastructure::cache::CacheFactory;
use crate::infrastructure::logging;

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Print every live key, one per line
    Keys {
        /// Only keys starting with this prefix
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Delete entries (all of them unless narrowed)
    Clear {
        /// Only keys starting with this prefix
        #[arg(long, conflicts_with = "pattern")]
        prefix: Option<String>,

        /// Only keys matching this glob (`*` wildcards)
        #[arg(long)]
        pattern: Option<String>,
    },
}

/// Run a cache command against the backend from configuration
pub async fn run(command: CacheCommand) -> anyhow::Result<()> {
    let config = AppConfig::load().unwrap_or_default();
    logging::init_logging(&config.logging)?;

    let cache = CacheFactory::new()
        .create(&config.cache.to_cache_config()?)
        .await?;

    let mut stdout = std::io::stdout();
    execute(cache.as_ref(), command, &mut stdout).await?;
    Ok(())
}

/// Executes `command`, writing listed keys to `out`; returns the key count
/// for `keys` and zero for `clear`
pub async fn execute<C, W>(cache: &C, command: CacheCommand, out: &mut W) -> anyhow::Result<usize>
where
    C: Cache + ?Sized,
    W: Write,
{
    match command {
        CacheCommand::Keys { prefix } => {
            let mut keys = cache.keys(prefix.as_deref());
            let mut count = 0usize;

            while let Some(key) = keys.try_next().await? {
                writeln!(out, "{}", key)?;
                count += 1;
            }

            info!(count, "Listed cache keys");
            Ok(count)
        }
        CacheCommand::Clear {
            pattern: Some(pattern),
            ..
        } => {
            cache.clear_pattern(&pattern).await?;
            info!(pattern = %pattern, "Cleared cache keys by pattern");
            Ok(0)
        }
        CacheCommand::Clear { prefix, .. } => {
            cache.clear(prefix.as_deref()).await?;
            info!(prefix = ?prefix, "Cleared cache");
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    use crate::domain::cache::SetOptions;
    use crate::infrastructure::cache::{InMemoryCache, InMemoryCacheConfig};

    async fn seeded() -> InMemoryCache<Value> {
        let cache = InMemoryCache::with_config(InMemoryCacheConfig::default().with_key_prefix("app:"));
        for key in ["user:1", "user:2", "post:1"] {
            cache.set(key, json!(key), SetOptions::new()).await.unwrap();
        }
        cache
    }

    #[tokio::test]
    async fn test_keys_prints_one_per_line() {
        let cache = seeded().await;
        let mut out = Vec::new();

        let count = execute(&cache, CacheCommand::Keys { prefix: Some("user:".into()) }, &mut out)
            .await
            .unwrap();

        assert_eq!(count, 2);
        let mut lines: Vec<&str> = std::str::from_utf8(&out).unwrap().lines().collect();
        lines.sort();
        assert_eq!(lines, vec!["user:1", "user:2"]);
    }

    #[tokio::test]
    async fn test_clear_by_pattern() {
        let cache = seeded().await;
        let mut out = Vec::new();

        execute(
            &cache,
            CacheCommand::Clear {
                prefix: None,
                pattern: Some("user:*".into()),
            },
            &mut out,
        )
        .await
        .unwrap();

        assert!(cache.get("user:1").await.unwrap().is_none());
        assert!(cache.get("post:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_everything() {
        let cache = seeded().await;
        let mut out = Vec::new();

        execute(&cache, CacheCommand::Clear { prefix: None, pattern: None }, &mut out)
            .await
            .unwrap();

        assert!(cache.is_empty());
        assert!(out.is_empty());
    }
}
