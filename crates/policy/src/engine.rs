//! The policy engine: per-invocation allow/deny evaluation.
//!
//! Evaluation order is fixed: identity resolution, deny-list, allow-list,
//! default verdict, parameter validation, rate check-and-increment, budget
//! stamping. Deny overrides allow; rate increments commit only on allow.
//!
//! The active document is swapped atomically on reload: readers clone an
//! `Arc` snapshot and in-flight evaluations continue against the version
//! they started with. A failed reload keeps the old document active.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};

use am_domain::config::{PolicyConfig, PolicyDefault};
use am_domain::error::{DenySubcode, Error, Result};
use am_domain::telemetry::TraceEvent;
use am_domain::TransactionContext;

use crate::audit::{AuditEntry, AuditLog};
use crate::document::{list_matches, PolicyDocument, PolicyProvider};
use crate::rate::{RateCheck, RateCounters, RateScope};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decisions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The kind of resource being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Agent,
    Tool,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Agent => "agent",
            ResourceKind::Tool => "tool",
        }
    }
}

/// Why a decision came out the way it did. Reasons are drawn from a finite
/// set; deny reasons map onto the stable `Denied` subcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecisionReason {
    AllowListed,
    DefaultAllow,
    ExplicitDeny,
    DefaultDeny,
    ParameterForbidden,
    RateLimited,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::AllowListed => "AllowListed",
            DecisionReason::DefaultAllow => "DefaultAllow",
            DecisionReason::ExplicitDeny => "ExplicitDeny",
            DecisionReason::DefaultDeny => "DefaultDeny",
            DecisionReason::ParameterForbidden => "ParameterForbidden",
            DecisionReason::RateLimited => "RateLimited",
        }
    }

    pub fn deny_subcode(&self) -> Option<DenySubcode> {
        match self {
            DecisionReason::ExplicitDeny => Some(DenySubcode::ExplicitDeny),
            DecisionReason::DefaultDeny => Some(DenySubcode::DefaultDeny),
            DecisionReason::ParameterForbidden => Some(DenySubcode::ParameterForbidden),
            DecisionReason::RateLimited => Some(DenySubcode::RateLimited),
            DecisionReason::AllowListed | DecisionReason::DefaultAllow => None,
        }
    }
}

/// Restrictions the caller must apply when acting on an allow.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AppliedRestrictions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_execution_time_ms: Option<u64>,
}

/// Outcome of one policy evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: DecisionReason,
    pub applied_restrictions: AppliedRestrictions,
}

impl PolicyDecision {
    /// The `Denied` error for a refusal, `None` for an allow.
    pub fn deny_error(&self, resource_id: &str) -> Option<Error> {
        self.reason.deny_subcode().map(|subcode| Error::Denied {
            subcode,
            message: format!("{} refused for \"{resource_id}\"", self.reason.as_str()),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PolicyEngine {
    default_role: String,
    path: Option<PathBuf>,
    config_default: PolicyDefault,
    active: RwLock<Arc<PolicyDocument>>,
    provider: Option<Arc<dyn PolicyProvider>>,
    rates: RateCounters,
    audit: AuditLog,
}

impl PolicyEngine {
    /// Build the engine and load the initial document from the local file
    /// (or built-in defaults). An external provider, when configured, is
    /// consulted on the first `reload()`.
    pub fn new(cfg: &PolicyConfig) -> Result<Self> {
        let document = match &cfg.path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
                PolicyDocument::from_toml(&raw)?
            }
            _ => PolicyDocument {
                default: cfg.default,
                ..PolicyDocument::default()
            },
        };

        tracing::info!(
            fingerprint = %document.fingerprint(),
            source = %cfg.path.as_ref().map_or("defaults".into(), |p| p.display().to_string()),
            "policy document loaded"
        );

        Ok(Self {
            default_role: cfg.default_role.clone(),
            path: cfg.path.clone(),
            config_default: cfg.default,
            active: RwLock::new(Arc::new(document)),
            provider: None,
            rates: RateCounters::hourly(),
            audit: AuditLog::new(cfg.audit_max_entries, cfg.audit_max_age_seconds),
        })
    }

    pub fn with_provider(mut self, provider: Arc<dyn PolicyProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Snapshot handle to the active document. Readers never block writers
    /// beyond this single clone; there are no locks in the evaluation path
    /// after it.
    pub fn snapshot(&self) -> Arc<PolicyDocument> {
        self.active.read().clone()
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Reload through the source chain (provider, file, defaults) and swap
    /// the new document in atomically. Returns the new fingerprint. On any
    /// failure the old document remains active.
    pub async fn reload(&self) -> Result<String> {
        let (raw, source): (Option<String>, &str) = match &self.provider {
            Some(provider) => match provider.fetch().await? {
                Some(text) => (Some(text), "provider"),
                None => (self.read_local_file()?, "file"),
            },
            None => (self.read_local_file()?, "file"),
        };

        let document = match raw {
            Some(text) => PolicyDocument::from_toml(&text)?,
            None => PolicyDocument {
                default: self.config_default,
                ..PolicyDocument::default()
            },
        };

        let fingerprint = document.fingerprint();
        *self.active.write() = Arc::new(document);

        TraceEvent::PolicyReloaded {
            source: source.to_owned(),
            fingerprint: fingerprint.clone(),
        }
        .emit();
        Ok(fingerprint)
    }

    fn read_local_file(&self) -> Result<Option<String>> {
        match &self.path {
            Some(path) if path.exists() => std::fs::read_to_string(path)
                .map(Some)
                .map_err(|e| Error::Config(format!("reading {}: {e}", path.display()))),
            _ => Ok(None),
        }
    }

    /// Evaluate one invocation. Always appends an audit entry.
    pub fn evaluate(
        &self,
        ctx: &TransactionContext,
        kind: ResourceKind,
        resource_id: &str,
        operation: &str,
        parameters: Option<&Map<String, Value>>,
    ) -> PolicyDecision {
        let started = Instant::now();
        let doc = self.snapshot();

        let role = if ctx.role.is_empty() {
            self.default_role.as_str()
        } else {
            ctx.role.as_str()
        };

        let decision = self.decide(&doc, role, ctx, kind, resource_id, parameters);

        let latency_ms = started.elapsed().as_millis() as u64;
        self.audit.append(AuditEntry {
            transaction_id: ctx.transaction_id.clone(),
            timestamp: Utc::now(),
            subject_id: ctx.user_id.clone().unwrap_or_else(|| role.to_owned()),
            role: role.to_owned(),
            resource_kind: kind.as_str().to_owned(),
            resource_id: resource_id.to_owned(),
            operation: operation.to_owned(),
            decision: decision.reason.as_str().to_owned(),
            allowed: decision.allowed,
            latency_ms,
        });

        TraceEvent::PolicyDecision {
            transaction_id: ctx.transaction_id.clone(),
            resource: format!("{}:{resource_id}", kind.as_str()),
            operation: operation.to_owned(),
            allowed: decision.allowed,
            reason: decision.reason.as_str().to_owned(),
        }
        .emit();

        decision
    }

    fn decide(
        &self,
        doc: &PolicyDocument,
        role: &str,
        ctx: &TransactionContext,
        kind: ResourceKind,
        resource_id: &str,
        parameters: Option<&Map<String, Value>>,
    ) -> PolicyDecision {
        let restrictions = doc.restrictions(resource_id);
        let applied = AppliedRestrictions {
            max_execution_time_ms: restrictions.and_then(|r| r.max_execution_time_ms),
        };

        let deny = |reason: DecisionReason| PolicyDecision {
            allowed: false,
            reason,
            applied_restrictions: AppliedRestrictions::default(),
        };

        // Allow/deny lookup. Deny overrides allow.
        let rules = doc.roles.get(role);
        let (deny_list, allow_list) = match kind {
            ResourceKind::Agent => (
                rules.map(|r| r.deny_agents.as_slice()).unwrap_or(&[]),
                rules.map(|r| r.allow_agents.as_slice()).unwrap_or(&[]),
            ),
            ResourceKind::Tool => (
                rules.map(|r| r.deny_tools.as_slice()).unwrap_or(&[]),
                rules.map(|r| r.allow_tools.as_slice()).unwrap_or(&[]),
            ),
        };

        if list_matches(deny_list, resource_id) {
            return deny(DecisionReason::ExplicitDeny);
        }

        let allow_reason = if list_matches(allow_list, resource_id) {
            DecisionReason::AllowListed
        } else if doc.default == PolicyDefault::Allow {
            DecisionReason::DefaultAllow
        } else {
            return deny(DecisionReason::DefaultDeny);
        };

        // Parameter validation against the resource's restrictions.
        if let (Some(params), Some(restrictions)) = (parameters, restrictions) {
            for key in params.keys() {
                if restrictions.forbidden_parameters.iter().any(|f| f == key) {
                    return deny(DecisionReason::ParameterForbidden);
                }
            }
            if let Some(allowed_params) = &restrictions.allowed_parameters {
                for key in params.keys() {
                    if !allowed_params.iter().any(|a| a == key) {
                        return deny(DecisionReason::ParameterForbidden);
                    }
                }
            }
        }

        // Rate check-and-increment, committed only because everything
        // above allowed.
        let mut checks = Vec::new();
        if let Some(limit) = doc.global_rate_limit_per_hour {
            checks.push(RateCheck {
                scope: RateScope::Global,
                subject: "global".into(),
                limit,
            });
        }
        if let (Some(limit), Some(user)) = (doc.user_rate_limit_per_hour, &ctx.user_id) {
            checks.push(RateCheck {
                scope: RateScope::User,
                subject: user.clone(),
                limit,
            });
        }
        if let Some(limit) = restrictions.and_then(|r| r.rate_limit_per_hour) {
            checks.push(RateCheck {
                scope: RateScope::Resource,
                subject: resource_id.to_owned(),
                limit,
            });
        }
        if !checks.is_empty() {
            if let Err(scope) = self.rates.check_and_increment(Utc::now(), &checks) {
                tracing::debug!(
                    scope = scope.as_str(),
                    resource = resource_id,
                    "rate limit exceeded"
                );
                return deny(DecisionReason::RateLimited);
            }
        }

        PolicyDecision {
            allowed: true,
            reason: allow_reason,
            applied_restrictions: applied,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
