//! Structured trace events and the span sink interface.

use serde::Serialize;

/// Structured trace events emitted across all AgentMesh crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionCreated {
        session_id: String,
        user_id: Option<String>,
    },
    SessionClosed {
        session_id: String,
        reason: String,
    },
    EventDropped {
        session_id: String,
        dropped_total: u64,
    },
    PlanBuilt {
        transaction_id: String,
        pattern: String,
        agents: Vec<String>,
        user_override: bool,
    },
    PatternCompleted {
        transaction_id: String,
        pattern: String,
        status: String,
        duration_ms: u64,
    },
    AgentInvoked {
        transaction_id: String,
        agent_id: String,
        attempts: u32,
        status: String,
        duration_ms: u64,
    },
    ToolCalled {
        transaction_id: String,
        tool: String,
        status: String,
        duration_ms: u64,
    },
    PolicyDecision {
        transaction_id: String,
        resource: String,
        operation: String,
        allowed: bool,
        reason: String,
    },
    PolicyReloaded {
        source: String,
        fingerprint: String,
    },
    AgentRegistered {
        agent_id: String,
        capabilities: usize,
    },
    AgentDeregistered {
        agent_id: String,
    },
    RegistryPruned {
        pruned: usize,
        remaining: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "am_event");
    }
}

/// A completed span at a component boundary.
#[derive(Debug, Clone, Serialize)]
pub struct SpanRecord {
    /// Boundary name, e.g. `"transport.messages"`, `"scheduler.parallel"`,
    /// `"a2a.invoke"`, `"tools.call"`, `"policy.evaluate"`.
    pub name: String,
    pub transaction_id: String,
    pub duration_ms: u64,
    pub ok: bool,
}

/// Sink for span records. The platform emits spans at transport entry/exit,
/// per-pattern execution, per-agent invocation, per-tool call, and
/// per-policy evaluation; what happens to them is the embedder's choice.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, span: SpanRecord);
}

/// Sink that discards everything. Fine for tests.
#[derive(Debug, Default)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn record(&self, _span: SpanRecord) {}
}

/// Sink that mirrors spans into the structured log.
#[derive(Debug, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, span: SpanRecord) {
        tracing::debug!(
            span = %span.name,
            transaction_id = %span.transaction_id,
            duration_ms = span.duration_ms,
            ok = span.ok,
            "am_span"
        );
    }
}
