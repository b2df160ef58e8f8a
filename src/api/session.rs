//! Session endpoints
//!
//! A small surface over the request session, mounted behind
//! `session_middleware`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::middleware::SessionHandle;
use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};
use crate::domain::session::Session;

/// Session snapshot returned to clients
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub id: String,
    pub is_new: bool,
    pub data: Value,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id().to_string(),
            is_new: session.is_new(),
            data: session.to_value(),
        }
    }
}

/// Routes for `/session`
pub fn create_session_router() -> Router<AppState> {
    Router::new()
        .route("/session", get(get_session).delete(destroy_session))
        .route(
            "/session/{key}",
            get(read_value).put(write_value).delete(delete_value),
        )
}

/// GET /session
pub async fn get_session(session: SessionHandle) -> Json<SessionView> {
    let context = session.lock().await;
    Json(SessionView::from(&context.session))
}

/// GET /session/{key}
pub async fn read_value(
    session: SessionHandle,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let context = session.lock().await;

    context
        .session
        .read(&key)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Session key '{}' not found", key)))
}

/// PUT /session/{key}; a JSON `null` removes the key
pub async fn write_value(
    session: SessionHandle,
    Path(key): Path<String>,
    Json(value): Json<Value>,
) -> Result<Json<SessionView>, ApiError> {
    let mut context = session.lock().await;
    context.session.write(&key, &value)?;
    Ok(Json(SessionView::from(&context.session)))
}

/// DELETE /session/{key}; responds with the removed value
pub async fn delete_value(
    session: SessionHandle,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let mut context = session.lock().await;

    context
        .session
        .consume(&key)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Session key '{}' not found", key)))
}

/// DELETE /session; drops stored data and issues a new id
pub async fn destroy_session(
    State(state): State<AppState>,
    session: SessionHandle,
) -> Result<StatusCode, ApiError> {
    let mut guard = session.lock().await;
    let context = &mut *guard;
    state
        .sessions
        .regenerate(&mut context.session, &mut context.jar)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
