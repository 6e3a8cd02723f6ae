//! HTTP implementation of [`AgentInvoker`].
//!
//! `HttpAgentClient` wraps a `reqwest::Client` and POSTs invocation
//! requests to each agent's `/invoke` endpoint, with automatic retry +
//! exponential back-off on transient (5xx / connect) failures.
//!
//! * Retries on 5xx status codes and on connection errors.
//! * Does **not** retry on 4xx (client errors are permanent).
//! * Never retries past the request deadline or a cancellation signal.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use am_domain::config::AgentClientConfig;
use am_domain::error::{Error, Result};
use am_domain::telemetry::TraceEvent;
use am_domain::TransactionContext;
use am_protocol::{A2aRequest, A2aResponse};
use am_registry::AgentSnapshot;

use crate::backoff::RetryBackoff;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invocation types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One agent invocation. Owned exclusively by its issuing scheduler task
/// for the duration of the call.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub context: TransactionContext,
    pub agent_id: String,
    pub input: String,
    pub parameters: Value,
    /// Prior step outputs, chained by sequential patterns.
    pub previous_results: Vec<Value>,
    /// Effective deadline: min of policy budget, caller timeout, pattern
    /// timeout.
    pub deadline: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Success,
    Failed,
    TimedOut,
    Denied,
    /// Failed because a cancellation signal arrived mid-flight. A flavor
    /// of `failed`, surfaced distinctly so peers in a fail-fast parallel
    /// pattern are tellable from the agent that actually failed.
    Cancelled,
}

/// Outcome of one invocation, errors included — the status field carries
/// the failure class instead of an `Err` branch so pattern runners can
/// aggregate uniformly.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationResult {
    pub agent_id: String,
    pub status: InvocationStatus,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
    pub attempts: u32,
}

impl InvocationResult {
    pub fn is_success(&self) -> bool {
        self.status == InvocationStatus::Success
    }

    pub fn success(agent_id: &str, payload: Value, latency_ms: u64, attempts: u32) -> Self {
        Self {
            agent_id: agent_id.to_owned(),
            status: InvocationStatus::Success,
            payload,
            error: None,
            latency_ms,
            attempts,
        }
    }

    pub fn failure(
        agent_id: &str,
        status: InvocationStatus,
        error: impl Into<String>,
        latency_ms: u64,
        attempts: u32,
    ) -> Self {
        Self {
            agent_id: agent_id.to_owned(),
            status,
            payload: Value::Null,
            error: Some(error.into()),
            latency_ms,
            attempts,
        }
    }

    /// Result for an invocation that was never attempted (policy denial or
    /// cancellation before dispatch).
    pub fn skipped(agent_id: &str, status: InvocationStatus, error: impl Into<String>) -> Self {
        Self::failure(agent_id, status, error, 0, 0)
    }
}

/// The outbound invocation seam. The scheduler depends on this trait, not
/// on HTTP, so pattern execution is testable against scripted agents.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(
        &self,
        agent: &AgentSnapshot,
        request: InvocationRequest,
        cancel: &CancellationToken,
    ) -> InvocationResult;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Created once and reused for the process lifetime; the underlying
/// `reqwest::Client` maintains a connection pool.
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    http: reqwest::Client,
    backoff: RetryBackoff,
}

impl HttpAgentClient {
    pub fn new(cfg: &AgentClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Internal(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            backoff: RetryBackoff::from_config(cfg),
        })
    }

    async fn attempt(
        &self,
        url: &str,
        request: &InvocationRequest,
        remaining: Duration,
    ) -> Result<A2aResponse> {
        let body = A2aRequest {
            input: request.input.clone(),
            parameters: request.parameters.clone(),
            previous_results: request.previous_results.clone(),
            timeout_ms: remaining.as_millis() as u64,
        };

        let response = self
            .http
            .post(url)
            .header("x-transaction-id", &request.context.transaction_id)
            .header("x-session-id", &request.context.session_id)
            .timeout(remaining)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::TimedOut(format!("agent request to {url} timed out"))
                } else {
                    // Connect failures and resets are transient.
                    Error::AgentUnreachable(format!("{url}: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::AgentUnreachable(format!("{url} returned {status}: {text}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::AgentFailed(format!("{url} returned {status}: {text}")));
        }

        let text = response
            .text()
            .await
            .map_err(|e| Error::AgentUnreachable(format!("{url}: reading body: {e}")))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::AgentFailed(format!("{url}: unparseable agent reply: {e}")))
    }
}

#[async_trait]
impl AgentInvoker for HttpAgentClient {
    async fn invoke(
        &self,
        agent: &AgentSnapshot,
        request: InvocationRequest,
        cancel: &CancellationToken,
    ) -> InvocationResult {
        let started = Instant::now();
        let agent_id = request.agent_id.clone();
        let url = format!("{}/invoke", agent.endpoint.trim_end_matches('/'));
        // Seed the jitter from the transaction id so concurrent invocations
        // of the same agent spread out.
        let nonce = request
            .context
            .transaction_id
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));

        let latency = |started: Instant| started.elapsed().as_millis() as u64;
        let mut attempts = 0u32;
        let mut last_error: Option<Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            if attempt > 0 {
                let delay = self.backoff.delay_for_attempt(attempt - 1, nonce);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return InvocationResult::failure(
                            &agent_id,
                            InvocationStatus::Cancelled,
                            "cancelled while backing off",
                            latency(started),
                            attempts,
                        );
                    }
                }
            }

            let remaining = request.deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return InvocationResult::failure(
                    &agent_id,
                    InvocationStatus::TimedOut,
                    "deadline exhausted",
                    latency(started),
                    attempts,
                );
            }

            attempts += 1;
            let outcome = tokio::select! {
                r = self.attempt(&url, &request, remaining) => r,
                _ = cancel.cancelled() => {
                    return InvocationResult::failure(
                        &agent_id,
                        InvocationStatus::Cancelled,
                        "cancelled mid-attempt",
                        latency(started),
                        attempts,
                    );
                }
            };

            let result = match outcome {
                Ok(reply) => {
                    if reply.status == "success" {
                        InvocationResult::success(&agent_id, reply.payload, latency(started), attempts)
                    } else {
                        InvocationResult::failure(
                            &agent_id,
                            InvocationStatus::Failed,
                            reply.error.unwrap_or_else(|| "agent reported failure".into()),
                            latency(started),
                            attempts,
                        )
                    }
                }
                Err(err) if err.is_transient() => {
                    tracing::debug!(
                        agent_id = %agent_id,
                        attempt,
                        error = %err,
                        "transient invocation failure"
                    );
                    last_error = Some(err);
                    continue;
                }
                Err(Error::TimedOut(msg)) => InvocationResult::failure(
                    &agent_id,
                    InvocationStatus::TimedOut,
                    msg,
                    latency(started),
                    attempts,
                ),
                Err(err) => InvocationResult::failure(
                    &agent_id,
                    InvocationStatus::Failed,
                    err.to_string(),
                    latency(started),
                    attempts,
                ),
            };

            TraceEvent::AgentInvoked {
                transaction_id: request.context.transaction_id.clone(),
                agent_id: agent_id.clone(),
                attempts,
                status: format!("{:?}", result.status).to_lowercase(),
                duration_ms: result.latency_ms,
            }
            .emit();
            return result;
        }

        // Retries exhausted on transient failures.
        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "all retries exhausted".into());
        let result = InvocationResult::failure(
            &agent_id,
            InvocationStatus::Failed,
            message,
            latency(started),
            attempts,
        );
        TraceEvent::AgentInvoked {
            transaction_id: request.context.transaction_id.clone(),
            agent_id,
            attempts,
            status: "failed".into(),
            duration_ms: result.latency_ms,
        }
        .emit();
        result
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use am_registry::AgentHealth;
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::Utc;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn snapshot(endpoint: &str) -> AgentSnapshot {
        AgentSnapshot {
            id: "a1".into(),
            name: "a1-name".into(),
            capabilities: BTreeSet::new(),
            endpoint: endpoint.into(),
            load: 0,
            max_capacity: 4,
            last_heartbeat: Utc::now(),
            health: AgentHealth::Healthy,
        }
    }

    fn request(deadline_ms: u64) -> InvocationRequest {
        InvocationRequest {
            context: TransactionContext::root("s1", None, "user"),
            agent_id: "a1".into(),
            input: "find users".into(),
            parameters: Value::Null,
            previous_results: Vec::new(),
            deadline: Instant::now() + Duration::from_millis(deadline_ms),
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(max_retries: u32) -> HttpAgentClient {
        HttpAgentClient::new(&AgentClientConfig {
            max_retries,
            backoff_base_ms: 5,
            backoff_cap_ms: 20,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn successful_invocation() {
        let endpoint = serve(Router::new().route(
            "/invoke",
            post(|Json(req): Json<A2aRequest>| async move {
                Json(A2aResponse {
                    status: "success".into(),
                    payload: serde_json::json!({ "echo": req.input }),
                    error: None,
                })
            }),
        ))
        .await;

        let result = client(0)
            .invoke(&snapshot(&endpoint), request(2000), &CancellationToken::new())
            .await;
        assert!(result.is_success());
        assert_eq!(result.payload["echo"], "find users");
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn agent_reported_failure_is_not_retried() {
        let hits = Arc::new(AtomicU32::new(0));
        let hits_srv = hits.clone();
        let endpoint = serve(Router::new().route(
            "/invoke",
            post(move || {
                let hits = hits_srv.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(A2aResponse {
                        status: "failed".into(),
                        payload: Value::Null,
                        error: Some("bad query".into()),
                    })
                }
            }),
        ))
        .await;

        let result = client(3)
            .invoke(&snapshot(&endpoint), request(2000), &CancellationToken::new())
            .await;
        assert_eq!(result.status, InvocationStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("bad query"));
        assert_eq!(hits.load(Ordering::SeqCst), 1, "no retry on permanent failure");
    }

    #[tokio::test]
    async fn transient_5xx_is_retried_until_success() {
        let hits = Arc::new(AtomicU32::new(0));
        let hits_srv = hits.clone();
        let endpoint = serve(Router::new().route(
            "/invoke",
            post(move || {
                let hits = hits_srv.clone();
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(axum::http::StatusCode::SERVICE_UNAVAILABLE)
                    } else {
                        Ok(Json(A2aResponse {
                            status: "success".into(),
                            payload: Value::Null,
                            error: None,
                        }))
                    }
                }
            }),
        ))
        .await;

        let result = client(3)
            .invoke(&snapshot(&endpoint), request(5000), &CancellationToken::new())
            .await;
        assert!(result.is_success());
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn retries_exhaust_to_failed() {
        let endpoint = serve(Router::new().route(
            "/invoke",
            post(|| async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }),
        ))
        .await;

        let result = client(2)
            .invoke(&snapshot(&endpoint), request(5000), &CancellationToken::new())
            .await;
        assert_eq!(result.status, InvocationStatus::Failed);
        assert_eq!(result.attempts, 3); // initial + 2 retries
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient_then_failed() {
        // Nothing listens on this port.
        let result = client(1)
            .invoke(
                &snapshot("http://127.0.0.1:9"),
                request(2000),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.status, InvocationStatus::Failed);
        assert!(result.attempts >= 2);
    }

    #[tokio::test]
    async fn deadline_exhaustion_times_out() {
        let endpoint = serve(Router::new().route(
            "/invoke",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Json(A2aResponse {
                    status: "success".into(),
                    payload: Value::Null,
                    error: None,
                })
            }),
        ))
        .await;

        let result = client(3)
            .invoke(&snapshot(&endpoint), request(100), &CancellationToken::new())
            .await;
        assert_eq!(result.status, InvocationStatus::TimedOut);
    }

    #[tokio::test]
    async fn cancellation_aborts_the_attempt() {
        let endpoint = serve(Router::new().route(
            "/invoke",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Json(A2aResponse {
                    status: "success".into(),
                    payload: Value::Null,
                    error: None,
                })
            }),
        ))
        .await;

        let cancel = CancellationToken::new();
        let invoke = {
            let cancel = cancel.clone();
            let client = client(0);
            let snap = snapshot(&endpoint);
            tokio::spawn(async move { client.invoke(&snap, request(60_000), &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = invoke.await.unwrap();
        assert_eq!(result.status, InvocationStatus::Cancelled);
    }
}
