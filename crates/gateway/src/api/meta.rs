//! Descriptive endpoints: health, patterns, override options.

use axum::extract::State;
use axum::response::Json;

use am_scheduler::Pattern;

use crate::state::AppState;

/// `GET /v1/health` — liveness plus subsystem counters.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.uptime_seconds(),
        "sessions": state.sessions.len(),
        "agents": state.registry.len(),
        "tools": state.tools.len(),
        "scheduler": {
            "in_flight": state.orchestrator.in_flight(),
            "queue_depth": state.orchestrator.queue_depth(),
        },
    }))
}

/// `GET /v1/patterns` — the orchestration patterns the scheduler runs.
pub async fn patterns() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "patterns": [
            {
                "name": "simple",
                "description": "single agent, single invocation",
            },
            {
                "name": "sequential",
                "description": "agents in order; each step sees the previous results; halts on failure",
            },
            {
                "name": "parallel",
                "description": "concurrent fan-out with a wall-clock timeout and optional fail-fast",
            },
            {
                "name": "loop",
                "description": "repeat the inner pattern until a condition is met or the iteration budget runs out",
            },
        ],
        "names": Pattern::known_names(),
    }))
}

/// `GET /v1/override-options` — the request-context fields a caller may
/// use to pin the plan.
pub async fn override_options() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "options": {
            "orchestration_pattern": "one of simple | sequential | parallel | loop",
            "agents": "unordered agent ids (parallel / simple)",
            "agent_sequence": "ordered agent ids (sequential / loop)",
            "parallel_config": { "timeout": "seconds", "fail_fast": "bool" },
            "loop_config": { "max_iterations": "count", "condition": "e.g. accuracy > 0.9" },
            "optional_agents": "sequential steps allowed to fail",
            "timeout_seconds": "whole-request deadline",
            "parameters": "opaque object forwarded to every agent",
        },
    }))
}
