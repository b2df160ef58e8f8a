//! Per-request session lifecycle
//!
//! `session_middleware` resolves the session from the `Cookie` header before
//! the handler runs and, once the handler has produced a response, persists
//! the session if it changed and appends any `Set-Cookie` headers.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::api::state::AppState;
use crate::api::types::ApiError;
use crate::domain::session::{MemoryCookieJar, Session};

/// The request's session and the cookies it queued
#[derive(Debug)]
pub struct SessionContext {
    pub session: Session,
    pub jar: MemoryCookieJar,
}

/// Extractor giving handlers access to the request's session
#[derive(Debug, Clone)]
pub struct SessionHandle(Arc<Mutex<SessionContext>>);

impl SessionHandle {
    fn new(session: Session, jar: MemoryCookieJar) -> Self {
        Self(Arc::new(Mutex::new(SessionContext { session, jar })))
    }

    pub async fn lock(&self) -> MutexGuard<'_, SessionContext> {
        self.0.lock().await
    }
}

impl<S> FromRequestParts<S> for SessionHandle
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionHandle>()
            .cloned()
            .ok_or_else(|| ApiError::internal("Session middleware is not installed"))
    }
}

/// Joins every `Cookie` header into one jar
fn cookie_jar(headers: &HeaderMap) -> MemoryCookieJar {
    let header = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ");

    MemoryCookieJar::from_header(&header)
}

/// Loads the session before the handler and persists it afterwards
///
/// A failed load rejects the request; a failed persist is logged and the
/// response goes out unchanged.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let mut jar = cookie_jar(request.headers());
    let session = state.sessions.load(&mut jar).await?;

    let handle = SessionHandle::new(session, jar);
    request.extensions_mut().insert(handle.clone());

    let mut response = next.run(request).await;

    let mut context = handle.lock().await;
    state.sessions.persist(&mut context.session).await;

    for cookie in context.jar.set_cookie_headers() {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => warn!(error = %e, "Skipping invalid Set-Cookie header"),
        }
    }

    Ok(response)
}
