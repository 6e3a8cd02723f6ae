//! Pattern execution: sequential chaining, bounded parallel fan-out with
//! fail-fast cancellation, and condition-checked loops.
//!
//! Each pattern run is a supervised group of tasks rooted at the request's
//! transaction context. Cancellation is cooperative: tasks observe their
//! token at suspension points, and a fail-fast trip or pattern timeout
//! cancels the whole group.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use am_a2a::{AgentInvoker, InvocationRequest, InvocationResult, InvocationStatus};
use am_domain::error::{Error, Result};
use am_domain::event::{Phase, SessionEvent};
use am_domain::TransactionContext;
use am_registry::AgentRegistry;

use crate::condition::Condition;
use crate::plan::{Pattern, Plan};

/// Extra wall-clock allowance for collecting results after a parallel
/// pattern's deadline, covering cancellation propagation.
const COLLECT_GRACE: Duration = Duration::from_millis(500);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Process-wide invocation limiter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bounds concurrent agent invocations across every session. Excess
/// callers queue up to `max_queue` deep; beyond that they are rejected
/// with `Overloaded`.
pub struct ProcessLimiter {
    sem: Arc<Semaphore>,
    max_in_flight: usize,
    waiting: AtomicUsize,
    max_queue: usize,
}

impl ProcessLimiter {
    pub fn new(max_in_flight: usize, max_queue: usize) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            waiting: AtomicUsize::new(0),
            max_queue,
        }
    }

    pub async fn acquire(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        if let Ok(permit) = self.sem.clone().try_acquire_owned() {
            return Ok(permit);
        }

        let waiting = self.waiting.fetch_add(1, Ordering::SeqCst);
        if waiting >= self.max_queue {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Overloaded(format!(
                "invocation queue is full ({waiting} waiting)"
            )));
        }

        let permit = self.sem.clone().acquire_owned().await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        permit.map_err(|_| Error::Internal("process limiter closed".into()))
    }

    /// Invocations currently waiting for a permit.
    pub fn queue_depth(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Invocations currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.sem.available_permits()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run inputs and outputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sink for progress events; the orchestrator points this at the session's
/// queue.
pub type EventFn = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Per-request inputs shared by every invocation of a run.
#[derive(Clone)]
pub struct RunParams {
    pub ctx: TransactionContext,
    pub query: String,
    pub parameters: Value,
    /// Request-level deadline (caller timeout capped by the default).
    pub deadline: Instant,
    /// Per-agent execution budgets stamped by the policy engine, in ms.
    pub budgets: HashMap<String, u64>,
}

/// One loop iteration: its per-agent results and their aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub results: Vec<InvocationResult>,
    pub aggregate: Value,
}

/// What a pattern run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Per-agent results in plan order (for loops: the last iteration's).
    pub results: Vec<InvocationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<Vec<IterationRecord>>,
}

/// Merge per-agent payload fields into one object, with an overall
/// `status` marker. Loop conditions read this shape.
pub fn aggregate_results(results: &[InvocationResult]) -> Value {
    let mut merged = Map::new();
    for result in results {
        if let Some(payload) = result.payload.as_object() {
            for (key, value) in payload {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    let all_ok = !results.is_empty() && results.iter().all(InvocationResult::is_success);
    merged.insert(
        "status".into(),
        Value::from(if all_ok { "success" } else { "failed" }),
    );
    Value::Object(merged)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct PatternRunner {
    invoker: Arc<dyn AgentInvoker>,
    registry: Arc<AgentRegistry>,
    limiter: Arc<ProcessLimiter>,
    emit: EventFn,
    parallel_max_in_flight: usize,
}

impl PatternRunner {
    pub fn new(
        invoker: Arc<dyn AgentInvoker>,
        registry: Arc<AgentRegistry>,
        limiter: Arc<ProcessLimiter>,
        emit: EventFn,
        parallel_max_in_flight: usize,
    ) -> Self {
        Self {
            invoker,
            registry,
            limiter,
            emit,
            parallel_max_in_flight,
        }
    }

    /// Execute the plan's pattern to completion (or cancellation).
    pub async fn run(
        &self,
        plan: &Plan,
        params: &RunParams,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        match &plan.pattern {
            Pattern::Simple => {
                let results = self.run_simple(plan, params, Vec::new(), cancel).await;
                RunOutcome {
                    results,
                    iterations: None,
                }
            }
            Pattern::Sequential => {
                let results = self.run_sequential(plan, params, Vec::new(), cancel).await;
                RunOutcome {
                    results,
                    iterations: None,
                }
            }
            Pattern::Parallel {
                timeout_seconds,
                fail_fast,
            } => {
                let results = self
                    .run_parallel(plan, params, Vec::new(), *timeout_seconds, *fail_fast, cancel)
                    .await;
                RunOutcome {
                    results,
                    iterations: None,
                }
            }
            Pattern::Loop {
                max_iterations,
                condition,
                inner,
            } => {
                self.run_loop(plan, params, *max_iterations, condition.as_deref(), inner, cancel)
                    .await
            }
        }
    }

    async fn run_simple(
        &self,
        plan: &Plan,
        params: &RunParams,
        previous: Vec<Value>,
        cancel: &CancellationToken,
    ) -> Vec<InvocationResult> {
        match plan.agents.first() {
            Some(agent_id) => vec![self.invoke_one(agent_id, params, previous, None, cancel).await],
            None => Vec::new(),
        }
    }

    /// Invoke in order, appending each success to the next step's
    /// `previous_results`. Halts on the first non-success unless the step
    /// is marked optional.
    async fn run_sequential(
        &self,
        plan: &Plan,
        params: &RunParams,
        seed: Vec<Value>,
        cancel: &CancellationToken,
    ) -> Vec<InvocationResult> {
        let mut results = Vec::with_capacity(plan.agents.len());
        let mut previous = seed;

        for agent_id in &plan.agents {
            if cancel.is_cancelled() {
                results.push(InvocationResult::skipped(
                    agent_id,
                    InvocationStatus::Cancelled,
                    "cancelled before dispatch",
                ));
                continue;
            }

            let result = self
                .invoke_one(agent_id, params, previous.clone(), None, cancel)
                .await;
            let halt = !result.is_success() && !plan.optional_agents.contains(agent_id);
            if result.is_success() {
                previous.push(result.payload.clone());
            }
            results.push(result);
            if halt {
                break;
            }
        }
        results
    }

    /// Fan out concurrently, bounded per request and per process, honoring
    /// the pattern timeout as a wall-clock deadline. With `fail_fast`, the
    /// first non-success cancels every peer.
    async fn run_parallel(
        &self,
        plan: &Plan,
        params: &RunParams,
        seed: Vec<Value>,
        timeout_seconds: u64,
        fail_fast: bool,
        cancel: &CancellationToken,
    ) -> Vec<InvocationResult> {
        let n = plan.agents.len();
        let group = cancel.child_token();
        let pattern_deadline = Instant::now() + Duration::from_secs(timeout_seconds);
        let request_sem = Arc::new(Semaphore::new(self.parallel_max_in_flight));

        let mut join: JoinSet<(usize, InvocationResult)> = JoinSet::new();
        for (idx, agent_id) in plan.agents.iter().enumerate() {
            let runner = self.clone();
            let params = params.clone();
            let group = group.clone();
            let request_sem = request_sem.clone();
            let agent_id = agent_id.clone();
            let previous = seed.clone();

            join.spawn(async move {
                let _permit = match request_sem.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => {
                        return (
                            idx,
                            InvocationResult::skipped(
                                &agent_id,
                                InvocationStatus::Cancelled,
                                "fan-out aborted",
                            ),
                        )
                    }
                };
                if group.is_cancelled() {
                    return (
                        idx,
                        InvocationResult::skipped(
                            &agent_id,
                            InvocationStatus::Cancelled,
                            "cancelled before dispatch",
                        ),
                    );
                }
                let result = runner
                    .invoke_one(&agent_id, &params, previous, Some(pattern_deadline), &group)
                    .await;
                (idx, result)
            });
        }

        let mut slots: Vec<Option<InvocationResult>> = (0..n).map(|_| None).collect();
        let collect_deadline = pattern_deadline + COLLECT_GRACE;
        let mut pattern_timed_out = false;

        loop {
            match tokio::time::timeout_at(collect_deadline, join.join_next()).await {
                Ok(Some(Ok((idx, result)))) => {
                    if fail_fast
                        && !result.is_success()
                        && result.status != InvocationStatus::Cancelled
                    {
                        group.cancel();
                    }
                    slots[idx] = Some(result);
                }
                Ok(Some(Err(join_err))) => {
                    tracing::error!(error = %join_err, "parallel invocation task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    pattern_timed_out = true;
                    group.cancel();
                    break;
                }
            }
        }
        join.abort_all();

        slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| {
                    let agent_id = &plan.agents[idx];
                    if pattern_timed_out {
                        InvocationResult::skipped(
                            agent_id,
                            InvocationStatus::TimedOut,
                            "pattern timeout",
                        )
                    } else {
                        InvocationResult::skipped(
                            agent_id,
                            InvocationStatus::Cancelled,
                            "cancelled",
                        )
                    }
                })
            })
            .collect()
    }

    /// Repeat the inner pattern, feeding each iteration's aggregate into
    /// the next, until the condition is met or the budget runs out. The
    /// condition is evaluated only on the iteration's aggregated result.
    async fn run_loop(
        &self,
        plan: &Plan,
        params: &RunParams,
        max_iterations: u32,
        condition: Option<&str>,
        inner: &Pattern,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let condition = condition.and_then(|raw| match Condition::parse(raw) {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::warn!(condition = raw, error = %e, "unparseable loop condition ignored");
                None
            }
        });

        let mut records: Vec<IterationRecord> = Vec::new();
        let mut aggregates: Vec<Value> = Vec::new();

        for iteration in 1..=max_iterations {
            if cancel.is_cancelled() {
                break;
            }
            (self.emit)(SessionEvent::Status {
                phase: Phase::Iteration,
                info: json!({ "iteration": iteration, "max_iterations": max_iterations }),
            });

            let results = match inner {
                Pattern::Parallel {
                    timeout_seconds,
                    fail_fast,
                } => {
                    self.run_parallel(
                        plan,
                        params,
                        aggregates.clone(),
                        *timeout_seconds,
                        *fail_fast,
                        cancel,
                    )
                    .await
                }
                Pattern::Simple => self.run_simple(plan, params, aggregates.clone(), cancel).await,
                // Loop-in-loop never comes out of planning; run the safe
                // equivalent.
                Pattern::Sequential | Pattern::Loop { .. } => {
                    self.run_sequential(plan, params, aggregates.clone(), cancel).await
                }
            };

            let aggregate = aggregate_results(&results);
            records.push(IterationRecord {
                iteration,
                results,
                aggregate: aggregate.clone(),
            });

            let met = match &condition {
                Some(c) => match c.evaluate(&aggregate) {
                    Some(met) => met,
                    None => {
                        tracing::warn!(
                            iteration,
                            "loop condition unevaluable on aggregate; treating as not met"
                        );
                        false
                    }
                },
                None => false,
            };
            aggregates.push(aggregate);
            if met {
                break;
            }
        }

        RunOutcome {
            results: records.last().map(|r| r.results.clone()).unwrap_or_default(),
            iterations: Some(records),
        }
    }

    async fn invoke_one(
        &self,
        agent_id: &str,
        params: &RunParams,
        previous: Vec<Value>,
        extra_deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> InvocationResult {
        (self.emit)(SessionEvent::Status {
            phase: Phase::AgentStart,
            info: json!({ "agent": agent_id }),
        });

        let result = self
            .dispatch(agent_id, params, previous, extra_deadline, cancel)
            .await;

        (self.emit)(SessionEvent::Status {
            phase: Phase::AgentComplete,
            info: json!({ "agent": agent_id, "status": result.status }),
        });
        result
    }

    async fn dispatch(
        &self,
        agent_id: &str,
        params: &RunParams,
        previous: Vec<Value>,
        extra_deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> InvocationResult {
        let Some(snapshot) = self.registry.get(agent_id) else {
            return InvocationResult::skipped(
                agent_id,
                InvocationStatus::Failed,
                format!("agent \"{agent_id}\" is not registered"),
            );
        };

        let _permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                return InvocationResult::skipped(agent_id, InvocationStatus::Failed, e.to_string())
            }
        };

        // Effective deadline: request deadline, pattern deadline, and the
        // policy budget — whichever bites first.
        let mut deadline = params.deadline;
        if let Some(extra) = extra_deadline {
            deadline = deadline.min(extra);
        }
        if let Some(budget_ms) = params.budgets.get(agent_id) {
            deadline = deadline.min(Instant::now() + Duration::from_millis(*budget_ms));
        }

        let request = InvocationRequest {
            context: params.ctx.child(),
            agent_id: agent_id.to_owned(),
            input: params.query.clone(),
            parameters: params.parameters.clone(),
            previous_results: previous,
            deadline,
        };

        self.invoker.invoke(&snapshot, request, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn limiter_rejects_when_queue_is_full() {
        let limiter = Arc::new(ProcessLimiter::new(1, 1));
        let held = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_flight(), 1);

        // One waiter is allowed to queue.
        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(limiter.queue_depth(), 1);

        // The next caller overflows the queue.
        let err = limiter.acquire().await.unwrap_err();
        assert_eq!(err.kind(), "Overloaded");

        drop(held);
        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(limiter.queue_depth(), 0);
    }

    #[test]
    fn aggregate_merges_payloads_and_derives_status() {
        let results = vec![
            InvocationResult::success("A1", json!({ "accuracy": 0.92 }), 5, 1),
            InvocationResult::success("A2", json!({ "rows": 14 }), 6, 1),
        ];
        let agg = aggregate_results(&results);
        assert_eq!(agg["accuracy"], 0.92);
        assert_eq!(agg["rows"], 14);
        assert_eq!(agg["status"], "success");
    }

    #[test]
    fn aggregate_marks_failed_when_any_fails() {
        let results = vec![
            InvocationResult::success("A1", json!({ "x": 1 }), 5, 1),
            InvocationResult::failure("A2", InvocationStatus::Failed, "boom", 5, 1),
        ];
        assert_eq!(aggregate_results(&results)["status"], "failed");
    }

    #[test]
    fn aggregate_of_nothing_is_failed() {
        assert_eq!(aggregate_results(&[])["status"], "failed");
    }
}
