//! PMP Session Cache
//!
//! Pluggable key-value caching with:
//! - In-memory, Redis (single node or cluster) and S3 backends
//! - TTL jitter policies and prefix-scoped child caches
//! - Cookie-backed sessions persisted only when modified

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;
