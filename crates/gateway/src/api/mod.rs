//! API surface: route table, error mapping, and bearer extraction.

pub mod admin;
pub mod agents;
pub mod messages;
pub mod meta;
pub mod sessions;
pub mod stream;
pub mod tools_rpc;
pub mod ws;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use am_domain::auth::ResolvedIdentity;
use am_domain::error::{Error, Result};

use crate::state::AppState;

/// Build the full route table.
pub fn router(state: AppState) -> Router {
    let cors = if state.config.server.cors_allowed_origins.is_empty() {
        CorsLayer::new()
    } else {
        let origins: Vec<_> = state
            .config
            .server
            .cors_allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    Router::new()
        .route("/v1/sessions", post(sessions::create))
        .route(
            "/v1/sessions/:id",
            get(sessions::inspect).delete(sessions::close),
        )
        .route("/v1/messages", post(messages::messages))
        .route("/v1/stream", get(stream::stream))
        .route("/v1/ws", get(ws::ws))
        .route("/v1/agents", get(agents::list))
        .route("/v1/agents/register", post(agents::register))
        .route("/v1/agents/:id/heartbeat", post(agents::heartbeat))
        .route("/v1/agents/:id", axum::routing::delete(agents::deregister))
        .route("/v1/patterns", get(meta::patterns))
        .route("/v1/override-options", get(meta::override_options))
        .route("/v1/health", get(meta::health))
        .route("/v1/tools/rpc", post(tools_rpc::rpc))
        .route("/v1/admin/policy/reload", post(admin::reload_policy))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Map an error kind to its transport status code and wrap the envelope.
pub fn error_response(err: &Error, transaction_id: &str) -> Response {
    let status = match err {
        Error::SessionNotFound(_) | Error::ToolNotFound(_) => StatusCode::NOT_FOUND,
        Error::SessionExpired(_) => StatusCode::GONE,
        Error::SessionClosed(_) => StatusCode::CONFLICT,
        Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        Error::Denied { .. } => StatusCode::FORBIDDEN,
        Error::Overloaded(_) => StatusCode::TOO_MANY_REQUESTS,
        Error::ToolTimeout(_) | Error::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::AgentUnreachable(_) | Error::AgentFailed(_) | Error::ToolFailed(_) => {
            StatusCode::BAD_GATEWAY
        }
        Error::Config(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({ "error": err.envelope(transaction_id) })),
    )
        .into_response()
}

/// Extract a bearer token from the Authorization header.
pub fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Resolve the caller's identity from the request headers.
pub fn identity(state: &AppState, headers: &HeaderMap) -> Result<ResolvedIdentity> {
    state.auth.resolve(bearer(headers))
}
