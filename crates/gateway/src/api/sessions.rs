//! Session lifecycle endpoints.
//!
//! - `POST   /v1/sessions`      — create
//! - `GET    /v1/sessions/{id}` — inspect (metadata + message log)
//! - `DELETE /v1/sessions/{id}` — close

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::api::{error_response, identity};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Explicit user id; defaults to the authenticated identity.
    #[serde(default)]
    pub user_id: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<CreateSessionRequest>>,
) -> Response {
    let identity = match identity(&state, &headers) {
        Ok(id) => id,
        Err(e) => return error_response(&e, ""),
    };
    let user_id = body
        .and_then(|Json(b)| b.user_id)
        .or(identity.user_id);

    let meta = state.sessions.create(user_id);
    (axum::http::StatusCode::CREATED, Json(serde_json::json!({ "session": meta }))).into_response()
}

pub async fn inspect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Response {
    if let Err(e) = identity(&state, &headers) {
        return error_response(&e, "");
    }
    match state.sessions.get(&session_id) {
        Ok(meta) => {
            let messages = state.sessions.history(&session_id).unwrap_or_default();
            Json(serde_json::json!({ "session": meta, "messages": messages })).into_response()
        }
        Err(e) => error_response(&e, ""),
    }
}

pub async fn close(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Response {
    if let Err(e) = identity(&state, &headers) {
        return error_response(&e, "");
    }
    match state.sessions.close(&session_id, "client request") {
        Ok(()) => Json(serde_json::json!({ "closed": session_id })).into_response(),
        Err(e) => error_response(&e, ""),
    }
}
