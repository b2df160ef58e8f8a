//! Session infrastructure - cache-backed session lifecycle

mod service;

pub use service::SessionService;
