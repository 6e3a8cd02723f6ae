use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use am_domain::auth::TokenAuthenticator;
use am_domain::config::Config;
use am_policy::PolicyEngine;
use am_registry::AgentRegistry;
use am_scheduler::Orchestrator;
use am_sessions::SessionStore;
use am_tools::ToolServer;

/// Shared application state passed to all API handlers.
///
/// Every subsystem is constructed once at start-up and injected here; no
/// hidden globals. Fields are grouped by concern:
/// - **Core** — config, auth
/// - **Subsystems** — sessions, registry, policy, tools, orchestrator
/// - **Lifecycle** — shutdown token, start time
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub auth: Arc<TokenAuthenticator>,

    // ── Subsystems ────────────────────────────────────────────────────
    pub sessions: Arc<SessionStore>,
    pub registry: Arc<AgentRegistry>,
    pub policy: Arc<PolicyEngine>,
    pub tools: Arc<ToolServer>,
    pub orchestrator: Arc<Orchestrator>,

    // ── Lifecycle ─────────────────────────────────────────────────────
    /// Cancelled once at shutdown; every long-lived task and blocking
    /// dequeue observes it.
    pub shutdown: CancellationToken,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
