//! Application state for shared services

use crate::infrastructure::cache::SharedCache;
use crate::infrastructure::session::SessionService;

/// Application state shared by handlers and middleware
#[derive(Debug, Clone)]
pub struct AppState {
    /// Cache serving the application (also probed by readiness checks)
    pub cache: SharedCache,
    pub sessions: SessionService,
}

impl AppState {
    pub fn new(cache: SharedCache, sessions: SessionService) -> Self {
        Self { cache, sessions }
    }
}
