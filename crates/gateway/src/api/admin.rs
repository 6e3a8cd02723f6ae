//! Admin endpoints, guarded by the admin bearer token.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};

use crate::api::{bearer, error_response};
use crate::state::AppState;

/// `POST /v1/admin/policy/reload` — re-run the policy source chain and
/// swap the active document. A failed reload leaves the old document
/// active and reports the error.
pub async fn reload_policy(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(e) = state.auth.check_admin(bearer(&headers)) {
        return error_response(&e, "");
    }
    match state.policy.reload().await {
        Ok(fingerprint) => Json(serde_json::json!({
            "reloaded": true,
            "fingerprint": fingerprint,
        }))
        .into_response(),
        Err(e) => error_response(&e, ""),
    }
}
