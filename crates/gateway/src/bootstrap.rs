//! Explicit construction of every subsystem, in dependency order, plus
//! the background tasks and the serve loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use am_a2a::{AgentInvoker, HttpAgentClient};
use am_domain::auth::TokenAuthenticator;
use am_domain::config::Config;
use am_domain::telemetry::{TelemetrySink, TracingSink};
use am_policy::PolicyEngine;
use am_registry::{AgentRecord, AgentRegistry};
use am_scheduler::{HeuristicPlanner, Orchestrator, Planner};
use am_sessions::{spawn_sweeper, SessionStore};
use am_tools::ToolServer;

use crate::api;
use crate::state::AppState;

/// Construct the application state. Each subsystem is built once and
/// passed by reference to the components that need it.
pub fn build_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let auth = Arc::new(TokenAuthenticator::new(
        config.auth.clone(),
        config.policy.default_role.clone(),
    ));

    let sessions = Arc::new(SessionStore::new(config.session.clone()));
    tracing::info!(
        ttl_seconds = config.session.ttl_seconds,
        queue_capacity = config.session.event_queue_capacity,
        "session store ready"
    );

    let registry = Arc::new(AgentRegistry::new(&config.registry));
    for seed in &config.registry.seed {
        registry
            .register(AgentRecord {
                id: seed.id.clone(),
                name: seed.name.clone(),
                capabilities: seed.capabilities.iter().cloned().collect(),
                endpoint: seed.endpoint.clone(),
                load: 0,
                max_capacity: seed.max_capacity,
                last_heartbeat: Utc::now(),
                reported_status: None,
                metadata: serde_json::Value::Null,
            })
            .with_context(|| format!("seeding agent \"{}\"", seed.id))?;
    }
    tracing::info!(agents = registry.len(), "agent registry ready");

    let policy = Arc::new(PolicyEngine::new(&config.policy).context("loading policy")?);

    let telemetry: Arc<dyn TelemetrySink> = Arc::new(TracingSink);

    let tools = Arc::new(ToolServer::new(
        &config.tools,
        auth.clone(),
        policy.clone(),
        telemetry.clone(),
    ));

    let invoker: Arc<dyn AgentInvoker> =
        Arc::new(HttpAgentClient::new(&config.agent_client).context("building agent client")?);
    let planner: Arc<dyn Planner> = Arc::new(HeuristicPlanner::new(
        3,
        config.scheduler.default_timeout_seconds,
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        config.scheduler.clone(),
        sessions.clone(),
        registry.clone(),
        policy.clone(),
        invoker,
        planner,
        telemetry,
    ));
    tracing::info!("orchestration scheduler ready");

    Ok(AppState {
        config,
        auth,
        sessions,
        registry,
        policy,
        tools,
        orchestrator,
        shutdown: CancellationToken::new(),
        started_at: Utc::now(),
    })
}

/// Spawn the long-lived background tasks: session sweep, registry prune,
/// and (when configured) the SIGHUP policy-reload listener.
pub fn spawn_background(state: &AppState) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    handles.push(spawn_sweeper(
        state.sessions.clone(),
        Duration::from_secs(state.config.session.sweep_interval_seconds),
        state.shutdown.clone(),
    ));

    handles.push({
        let registry = state.registry.clone();
        let shutdown = state.shutdown.clone();
        let interval = Duration::from_secs(state.config.registry.heartbeat_timeout_seconds);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => { registry.prune(Utc::now()); }
                    _ = shutdown.cancelled() => return,
                }
            }
        })
    });

    #[cfg(unix)]
    if state.config.policy.reload_on_signal {
        let policy = state.policy.clone();
        let shutdown = state.shutdown.clone();
        handles.push(tokio::spawn(async move {
            let Ok(mut hangup) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            else {
                tracing::warn!("SIGHUP handler unavailable; policy reload on signal disabled");
                return;
            };
            loop {
                tokio::select! {
                    Some(_) = hangup.recv() => {
                        match policy.reload().await {
                            Ok(fingerprint) => {
                                tracing::info!(%fingerprint, "policy reloaded on SIGHUP");
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "policy reload failed; old policy stays active");
                            }
                        }
                    }
                    _ = shutdown.cancelled() => return,
                }
            }
        }));
    }

    handles
}

/// Start the gateway server with the given configuration and serve until
/// ctrl-c, then drain.
pub async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("AgentMesh starting");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            am_domain::config::ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            am_domain::config::ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let error_count = issues
        .iter()
        .filter(|i| i.severity == am_domain::config::ConfigSeverity::Error)
        .count();
    if error_count > 0 {
        anyhow::bail!("config validation failed with {error_count} error(s)");
    }

    let state = build_state(config.clone())?;
    let background = spawn_background(&state);

    let app = api::router(state.clone());
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "gateway listening");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received; draining in-flight requests");
            shutdown.cancel();
        })
        .await
        .context("serving")?;

    for handle in background {
        handle.abort();
    }
    tracing::info!("AgentMesh stopped");
    Ok(())
}
