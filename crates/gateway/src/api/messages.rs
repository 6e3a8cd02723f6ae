//! Synchronous request/response transport.
//!
//! `POST /v1/messages` blocks until the request's terminal event and
//! returns the aggregated result in one response. Streaming clients use
//! `/v1/stream` or `/v1/ws` against the same session instead.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use am_domain::TransactionContext;
use am_scheduler::RequestContext;

use crate::api::{error_response, identity};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessagesRequest {
    /// Session to speak in; absent = a session is created implicitly.
    #[serde(default)]
    pub session_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub context: Option<RequestContext>,
}

pub async fn messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<MessagesRequest>,
) -> Response {
    let identity = match identity(&state, &headers) {
        Ok(id) => id,
        Err(e) => return error_response(&e, ""),
    };

    let session_id = match body.session_id {
        Some(id) => id,
        None => state.sessions.create(identity.user_id.clone()).id,
    };

    let ctx = TransactionContext::root(&session_id, identity.user_id, &identity.role);
    let cancel = state.shutdown.child_token();

    match state
        .orchestrator
        .handle_message(&ctx, &body.content, body.context.unwrap_or_default(), cancel)
        .await
    {
        Ok(result) => Json(serde_json::json!({
            "session_id": session_id,
            "result": result,
        }))
        .into_response(),
        Err(e) => error_response(&e, &ctx.transaction_id),
    }
}
