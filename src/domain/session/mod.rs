//! Session domain - cookie-carried, cache-backed request sessions

mod cookie;
mod entity;

pub use cookie::{CookieJar, CookieOptions, MemoryCookieJar, SameSite};
pub use entity::{generate_session_id, is_valid_session_id, Session, SessionOptions};
