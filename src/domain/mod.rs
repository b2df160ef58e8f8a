//! Domain layer - Core abstractions and entities

pub mod cache;
pub mod error;
pub mod session;

pub use cache::{Cache, CacheExt, SetOptions};
pub use error::DomainError;
pub use session::Session;
