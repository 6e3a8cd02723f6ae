//! The orchestration scheduler: plan, police, execute, aggregate.
//!
//! On each top-level request the orchestrator parses intent, builds a plan
//! (user overrides or the planner), evaluates policy per agent, executes
//! the pattern through the [`runner`], and emits progress plus a terminal
//! event into the session's queue.

pub mod condition;
pub mod plan;
pub mod planner;
pub mod runner;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use am_a2a::{AgentInvoker, InvocationResult};
use am_domain::config::SchedulerConfig;
use am_domain::error::{DenySubcode, Error, Result};
use am_domain::event::{Phase, SessionEvent};
use am_domain::telemetry::{SpanRecord, TelemetrySink, TraceEvent};
use am_domain::TransactionContext;
use am_policy::{PolicyEngine, ResourceKind};
use am_registry::{AgentRegistry, SelectionStrategy};
use am_sessions::{Message, SessionStore};

pub use condition::Condition;
pub use plan::{Pattern, Plan, RequestContext};
pub use planner::{HeuristicPlanner, Planner, PlannerProposal};
pub use runner::{
    aggregate_results, EventFn, IterationRecord, PatternRunner, ProcessLimiter, RunOutcome,
    RunParams,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The aggregated outcome of one orchestrated request.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationResult {
    pub transaction_id: String,
    pub pattern: String,
    pub user_override: bool,
    pub agents: Vec<String>,
    /// Per-agent results in plan order (for loops: the final iteration's).
    pub results: Vec<InvocationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations_completed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<Vec<IterationRecord>>,
    /// `success`, `partial`, or `failed`.
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

fn derive_status(results: &[InvocationResult]) -> &'static str {
    if results.is_empty() {
        return "failed";
    }
    let successes = results.iter().filter(|r| r.is_success()).count();
    if successes == results.len() {
        "success"
    } else if successes > 0 {
        "partial"
    } else {
        "failed"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    cfg: SchedulerConfig,
    sessions: Arc<SessionStore>,
    registry: Arc<AgentRegistry>,
    policy: Arc<PolicyEngine>,
    invoker: Arc<dyn AgentInvoker>,
    planner: Arc<dyn Planner>,
    telemetry: Arc<dyn TelemetrySink>,
    limiter: Arc<ProcessLimiter>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: SchedulerConfig,
        sessions: Arc<SessionStore>,
        registry: Arc<AgentRegistry>,
        policy: Arc<PolicyEngine>,
        invoker: Arc<dyn AgentInvoker>,
        planner: Arc<dyn Planner>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let limiter = Arc::new(ProcessLimiter::new(
            cfg.process_max_in_flight,
            cfg.queue_overflow_limit,
        ));
        Self {
            cfg,
            sessions,
            registry,
            policy,
            invoker,
            planner,
            telemetry,
            limiter,
        }
    }

    /// Invocations currently queued behind the process-wide bound.
    pub fn queue_depth(&self) -> usize {
        self.limiter.queue_depth()
    }

    pub fn in_flight(&self) -> usize {
        self.limiter.in_flight()
    }

    /// Run one user message through the full pipeline. Progress and the
    /// terminal event land in the session's queue; the aggregated result
    /// is also returned for synchronous callers.
    ///
    /// The transaction context comes from the transport — it is created at
    /// the top of every externally-initiated operation, and this method
    /// only derives children from it.
    ///
    /// Errors raised before processing starts (unknown, expired, closed,
    /// or busy session) are returned without touching the event queue:
    /// they belong to the submitting transport, not to the session's
    /// stream. Everything after that also lands as a terminal `error`
    /// event.
    pub async fn handle_message(
        &self,
        ctx: &TransactionContext,
        content: &str,
        context: RequestContext,
        cancel: CancellationToken,
    ) -> Result<OrchestrationResult> {
        let session_id = ctx.session_id.as_str();
        let started = std::time::Instant::now();

        self.sessions.get(session_id)?;
        self.sessions.try_begin_processing(session_id)?;
        self.sessions
            .append_message(session_id, Message::user(content))?;

        let outcome = self.run(ctx, session_id, content, context, cancel).await;

        self.telemetry.record(SpanRecord {
            name: "scheduler.request".into(),
            transaction_id: ctx.transaction_id.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            ok: outcome.is_ok(),
        });

        // Terminal event first, then release the session: the next request
        // must not be able to interleave events ahead of this one's
        // terminal.
        let outcome = match outcome {
            Ok(result) => {
                let metadata = json!({
                    "pattern": &result.pattern,
                    "user_override": result.user_override,
                    "agents": &result.agents,
                    "transaction_id": &result.transaction_id,
                    "duration_ms": started.elapsed().as_millis() as u64,
                });
                let summary = aggregate_results(&result.results);
                let _ = self.sessions.append_message(
                    session_id,
                    Message::agent(summary.to_string(), Some(metadata)),
                );
                let payload = serde_json::to_value(&result).unwrap_or(Value::Null);
                let _ = self
                    .sessions
                    .enqueue_event(session_id, SessionEvent::Complete { result: payload });
                Ok(result)
            }
            Err(err) => {
                let _ = self.sessions.enqueue_event(
                    session_id,
                    SessionEvent::Error(err.envelope(&ctx.transaction_id)),
                );
                Err(err)
            }
        };
        self.sessions.end_processing(session_id);
        outcome
    }

    async fn run(
        &self,
        ctx: &TransactionContext,
        session_id: &str,
        query: &str,
        context: RequestContext,
        cancel: CancellationToken,
    ) -> Result<OrchestrationResult> {
        let emit: EventFn = {
            let sessions = self.sessions.clone();
            let session_id = session_id.to_owned();
            Arc::new(move |event| {
                let _ = sessions.enqueue_event(&session_id, event);
            })
        };

        emit(SessionEvent::Status {
            phase: Phase::Planning,
            info: Value::Null,
        });

        let timeout_seconds = context
            .timeout_seconds
            .unwrap_or(self.cfg.default_timeout_seconds);
        let parameters = context.parameters.clone().unwrap_or(Value::Null);

        let plan = self.build_plan(query, &context).await?;
        TraceEvent::PlanBuilt {
            transaction_id: ctx.transaction_id.clone(),
            pattern: plan.pattern.name().into(),
            agents: plan.agents.clone(),
            user_override: plan.user_override,
        }
        .emit();

        let (plan, budgets, dropped) = self.filter_by_policy(ctx, plan, &context)?;

        emit(SessionEvent::Status {
            phase: Phase::Dispatching,
            info: json!({
                "pattern": plan.pattern.name(),
                "agents": &plan.agents,
                "denied": dropped,
            }),
        });

        let params = RunParams {
            ctx: ctx.clone(),
            query: query.to_owned(),
            parameters,
            deadline: Instant::now() + Duration::from_secs(timeout_seconds),
            budgets,
        };
        let runner = PatternRunner::new(
            self.invoker.clone(),
            self.registry.clone(),
            self.limiter.clone(),
            emit,
            self.cfg.parallel_max_in_flight,
        );

        let run_started = std::time::Instant::now();
        let outcome = runner.run(&plan, &params, &cancel).await;
        let status = derive_status(&outcome.results);

        TraceEvent::PatternCompleted {
            transaction_id: ctx.transaction_id.clone(),
            pattern: plan.pattern.name().into(),
            status: status.into(),
            duration_ms: run_started.elapsed().as_millis() as u64,
        }
        .emit();

        Ok(OrchestrationResult {
            transaction_id: ctx.transaction_id.clone(),
            pattern: plan.pattern.name().into(),
            user_override: plan.user_override,
            agents: plan.agents,
            iterations_completed: outcome.iterations.as_ref().map(|v| v.len() as u32),
            iterations: outcome.iterations,
            results: outcome.results,
            status: status.into(),
            timestamp: Utc::now(),
        })
    }

    /// Step B: the caller's overrides win; otherwise the planner proposes
    /// and the registry validates.
    async fn build_plan(&self, query: &str, context: &RequestContext) -> Result<Plan> {
        if context.has_overrides() {
            let plan = context.build_override_plan(&self.cfg)?;
            let picked = self
                .registry
                .select(&[], &SelectionStrategy::Pinned(plan.agents.clone()));
            if picked.len() != plan.agents.len() {
                let missing: Vec<&str> = plan
                    .agents
                    .iter()
                    .filter(|id| !picked.iter().any(|p| &p.id == *id))
                    .map(String::as_str)
                    .collect();
                return Err(Error::Denied {
                    subcode: DenySubcode::NoEligibleAgent,
                    message: format!("pinned agents unavailable: {}", missing.join(", ")),
                });
            }
            return Ok(plan);
        }

        let available = self.registry.available();
        let proposal = self.planner.plan(query, &available).await?;
        let agents: Vec<String> = proposal
            .agents
            .into_iter()
            .filter(|id| available.iter().any(|a| &a.id == id))
            .collect();
        if agents.is_empty() {
            return Err(Error::Denied {
                subcode: DenySubcode::NoEligibleAgent,
                message: "no registered agent covers this request".into(),
            });
        }

        // A plan that shrank to one agent runs as simple.
        let pattern = if agents.len() == 1 {
            Pattern::Simple
        } else {
            proposal.pattern
        };

        Ok(Plan {
            pattern,
            agents,
            user_override: false,
            optional_agents: HashSet::new(),
        })
    }

    /// Step C: evaluate each planned agent; sequential-class patterns
    /// refuse on any denial, parallel drops denied agents and proceeds
    /// with the survivors.
    fn filter_by_policy(
        &self,
        ctx: &TransactionContext,
        plan: Plan,
        context: &RequestContext,
    ) -> Result<(Plan, HashMap<String, u64>, Vec<String>)> {
        let params = context
            .parameters
            .as_ref()
            .and_then(Value::as_object)
            .cloned();

        let mut budgets = HashMap::new();
        let mut allowed = Vec::new();
        let mut denials: Vec<(String, Error)> = Vec::new();

        for agent_id in &plan.agents {
            let decision =
                self.policy
                    .evaluate(ctx, ResourceKind::Agent, agent_id, "invoke", params.as_ref());
            match decision.deny_error(agent_id) {
                None => {
                    if let Some(ms) = decision.applied_restrictions.max_execution_time_ms {
                        budgets.insert(agent_id.clone(), ms);
                    }
                    allowed.push(agent_id.clone());
                }
                Some(err) => denials.push((agent_id.clone(), err)),
            }
        }

        if denials.is_empty() {
            return Ok((plan, budgets, Vec::new()));
        }

        match plan.pattern {
            // Survivors carry a parallel plan; everything else refuses.
            Pattern::Parallel { .. } if !allowed.is_empty() => {
                let dropped: Vec<String> = denials.into_iter().map(|(id, _)| id).collect();
                tracing::warn!(
                    transaction_id = %ctx.transaction_id,
                    dropped = ?dropped,
                    "denied agents removed from parallel plan"
                );
                Ok((
                    Plan {
                        agents: allowed,
                        ..plan
                    },
                    budgets,
                    dropped,
                ))
            }
            _ => Err(denials.remove(0).1),
        }
    }
}
