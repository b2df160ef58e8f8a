//! CLI module
//!
//! Subcommands:
//! - `serve`: HTTP server with the session API
//! - `cache`: inspect or clear the configured cache backend

pub mod cache;
pub mod serve;

use clap::{Parser, Subcommand};

/// Pluggable cache backends and cookie-backed sessions
#[derive(Parser)]
#[command(name = "pmp-session-cache")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP server
    Serve,

    /// Inspect or clear the configured cache
    #[command(subcommand)]
    Cache(cache::CacheCommand),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cache_clear_pattern() {
        let cli = Cli::try_parse_from(["pmp-session-cache", "cache", "clear", "--pattern", "user:*"])
            .unwrap();

        match cli.command {
            Command::Cache(cache::CacheCommand::Clear { prefix, pattern }) => {
                assert_eq!(prefix, None);
                assert_eq!(pattern.as_deref(), Some("user:*"));
            }
            _ => panic!("expected cache clear"),
        }
    }

    #[test]
    fn test_prefix_and_pattern_conflict() {
        let result = Cli::try_parse_from([
            "pmp-session-cache",
            "cache",
            "clear",
            "--prefix",
            "a",
            "--pattern",
            "b*",
        ]);
        assert!(result.is_err());
    }
}
