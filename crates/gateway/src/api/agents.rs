//! Agent registry endpoints.
//!
//! - `GET    /v1/agents`                — list (optionally by capability)
//! - `POST   /v1/agents/register`       — self-publication / upsert
//! - `POST   /v1/agents/{id}/heartbeat` — load + liveness report
//! - `DELETE /v1/agents/{id}`           — graceful deregistration

use std::collections::BTreeSet;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use am_registry::{AgentRecord, ReportedStatus};

use crate::api::{error_response, identity};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub capability: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    if let Err(e) = identity(&state, &headers) {
        return error_response(&e, "");
    }
    let agents = state.registry.list_all(query.capability.as_deref());
    Json(serde_json::json!({ "agents": agents })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    pub endpoint: String,
    #[serde(default = "d_max_capacity")]
    pub max_capacity: u32,
    #[serde(default)]
    pub metadata: Value,
}

fn d_max_capacity() -> u32 {
    8
}

pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterRequest>,
) -> Response {
    if let Err(e) = identity(&state, &headers) {
        return error_response(&e, "");
    }
    let record = AgentRecord {
        id: body.id.clone(),
        name: body.name,
        capabilities: body.capabilities,
        endpoint: body.endpoint,
        load: 0,
        max_capacity: body.max_capacity,
        last_heartbeat: Utc::now(),
        reported_status: None,
        metadata: body.metadata,
    };
    match state.registry.register(record) {
        Ok(()) => Json(serde_json::json!({ "registered": body.id })).into_response(),
        Err(e) => error_response(&e, ""),
    }
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub load: u32,
    #[serde(default)]
    pub status: Option<ReportedStatus>,
}

pub async fn heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
    Json(body): Json<HeartbeatRequest>,
) -> Response {
    if let Err(e) = identity(&state, &headers) {
        return error_response(&e, "");
    }
    match state.registry.heartbeat(&agent_id, body.load, body.status) {
        Ok(()) => Json(serde_json::json!({ "agent": agent_id })).into_response(),
        Err(e) => error_response(&e, ""),
    }
}

pub async fn deregister(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> Response {
    if let Err(e) = identity(&state, &headers) {
        return error_response(&e, "");
    }
    let removed = state.registry.deregister(&agent_id);
    Json(serde_json::json!({ "agent": agent_id, "removed": removed })).into_response()
}
