//! The tool server: authenticated, policy-gated dispatch to registered
//! adapters.
//!
//! Call pipeline: token → role, policy evaluation, adapter lookup, schema
//! validation, bounded dispatch, execution-budget timeout, normalized
//! result. Policy runs before the lookup so a denied caller learns nothing
//! about which tools are registered. The transaction id rides along into
//! every log line and span.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;

use am_domain::auth::TokenAuthenticator;
use am_domain::config::ToolsConfig;
use am_domain::error::{Error, Result};
use am_domain::telemetry::{SpanRecord, TelemetrySink, TraceEvent};
use am_domain::TransactionContext;
use am_policy::{PolicyEngine, ResourceKind};
use am_protocol::ToolDescriptor;

use crate::adapter::ToolAdapter;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Ok,
    Error,
}

/// Normalized tool call outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct AdapterSlot {
    adapter: Arc<dyn ToolAdapter>,
    limiter: Arc<Semaphore>,
}

pub struct ToolServer {
    auth: Arc<TokenAuthenticator>,
    policy: Arc<PolicyEngine>,
    telemetry: Arc<dyn TelemetrySink>,
    default_timeout: Duration,
    max_in_flight: usize,
    adapters: RwLock<HashMap<String, AdapterSlot>>,
}

impl ToolServer {
    pub fn new(
        cfg: &ToolsConfig,
        auth: Arc<TokenAuthenticator>,
        policy: Arc<PolicyEngine>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            auth,
            policy,
            telemetry,
            default_timeout: Duration::from_secs(cfg.default_timeout_seconds),
            max_in_flight: cfg.max_in_flight_per_adapter,
            adapters: RwLock::new(HashMap::new()),
        }
    }

    /// Register an adapter. Later registrations with the same name replace
    /// earlier ones.
    pub fn register(&self, adapter: Arc<dyn ToolAdapter>) {
        let name = adapter.name().to_owned();
        tracing::info!(tool = %name, "tool adapter registered");
        self.adapters.write().insert(
            name,
            AdapterSlot {
                adapter,
                limiter: Arc::new(Semaphore::new(self.max_in_flight)),
            },
        );
    }

    /// Descriptors of every registered tool, for `tools/list`.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut out: Vec<ToolDescriptor> = self
            .adapters
            .read()
            .values()
            .map(|slot| ToolDescriptor {
                name: slot.adapter.name().to_owned(),
                description: slot.adapter.description().to_owned(),
                input_schema: slot.adapter.schema().to_json_schema(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn len(&self) -> usize {
        self.adapters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.read().is_empty()
    }

    /// Execute a tool call through the full pipeline.
    pub async fn call(
        &self,
        tool_id: &str,
        arguments: Value,
        auth_token: Option<&str>,
        parent: Option<&TransactionContext>,
    ) -> Result<ToolResult> {
        let started = Instant::now();

        // 1. Authenticate and derive the calling context.
        let identity = self.auth.resolve(auth_token)?;
        let ctx = match parent {
            Some(parent) => parent.child(),
            None => TransactionContext::root("tool-server", identity.user_id.clone(), identity.role.clone()),
        };

        let outcome = self.dispatch(tool_id, arguments, &ctx, started).await;

        let status = match &outcome {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        TraceEvent::ToolCalled {
            transaction_id: ctx.transaction_id.clone(),
            tool: tool_id.to_owned(),
            status: status.to_owned(),
            duration_ms,
        }
        .emit();
        self.telemetry.record(SpanRecord {
            name: "tools.call".into(),
            transaction_id: ctx.transaction_id.clone(),
            duration_ms,
            ok: outcome.is_ok(),
        });

        outcome
    }

    async fn dispatch(
        &self,
        tool_id: &str,
        arguments: Value,
        ctx: &TransactionContext,
        started: Instant,
    ) -> Result<ToolResult> {
        // 2. Policy check with the argument keys as parameters. This comes
        //    before the adapter lookup so unauthorized callers cannot probe
        //    which tools exist.
        let params: Option<Map<String, Value>> = arguments.as_object().cloned();
        let decision =
            self.policy
                .evaluate(ctx, ResourceKind::Tool, tool_id, "call", params.as_ref());
        if let Some(err) = decision.deny_error(tool_id) {
            return Err(err);
        }

        // 3. Resolve the adapter and validate the arguments against its
        //    declared schema.
        let (adapter, limiter) = {
            let adapters = self.adapters.read();
            let slot = adapters
                .get(tool_id)
                .ok_or_else(|| Error::ToolNotFound(tool_id.to_owned()))?;
            (slot.adapter.clone(), slot.limiter.clone())
        };

        adapter
            .schema()
            .check_arguments(&arguments)
            .map_err(Error::InvalidRequest)?;

        // 4. Bounded dispatch: a saturated adapter rejects rather than
        //    queueing without bound.
        let _permit = limiter
            .try_acquire()
            .map_err(|_| Error::Overloaded(format!("tool \"{tool_id}\" is saturated")))?;

        // 5. Execution budget from policy, else the configured default.
        let budget = decision
            .applied_restrictions
            .max_execution_time_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        let data = match tokio::time::timeout(budget, adapter.call(arguments, ctx)).await {
            Ok(Ok(data)) => data,
            Ok(Err(e)) => {
                return Err(Error::ToolFailed(format!("{tool_id}: {e}")));
            }
            Err(_) => {
                return Err(Error::ToolTimeout(format!(
                    "{tool_id}: exceeded {} ms",
                    budget.as_millis()
                )));
            }
        };

        Ok(ToolResult {
            status: ToolStatus::Ok,
            data,
            error: None,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
