//! Shared error type used across all AgentMesh crates.
//!
//! Every component boundary returns [`Result`]; the variant set is the
//! complete error surface of the platform. Each variant maps to a stable
//! `kind` identifier that appears in wire envelopes, logs, and audit
//! entries — the Rust enum and the wire vocabulary never drift apart.

use serde::{Deserialize, Serialize};

/// Subcode attached to a policy refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenySubcode {
    ExplicitDeny,
    ParameterForbidden,
    RateLimited,
    DefaultDeny,
    NoEligibleAgent,
}

impl DenySubcode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenySubcode::ExplicitDeny => "ExplicitDeny",
            DenySubcode::ParameterForbidden => "ParameterForbidden",
            DenySubcode::RateLimited => "RateLimited",
            DenySubcode::DefaultDeny => "DefaultDeny",
            DenySubcode::NoEligibleAgent => "NoEligibleAgent",
        }
    }
}

impl std::fmt::Display for DenySubcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session closed: {0}")]
    SessionClosed(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("denied ({subcode}): {message}")]
    Denied {
        subcode: DenySubcode,
        message: String,
    },

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool timed out: {0}")]
    ToolTimeout(String),

    #[error("tool failed: {0}")]
    ToolFailed(String),

    #[error("agent unreachable: {0}")]
    AgentUnreachable(String),

    #[error("agent failed: {0}")]
    AgentFailed(String),

    #[error("overloaded: {0}")]
    Overloaded(String),

    #[error("timed out: {0}")]
    TimedOut(String),

    #[error("config: {0}")]
    Config(String),

    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable kind identifier for envelopes, logs, and audit entries.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::SessionNotFound(_) => "SessionNotFound",
            Error::SessionClosed(_) => "SessionClosed",
            Error::SessionExpired(_) => "SessionExpired",
            Error::InvalidRequest(_) => "InvalidRequest",
            Error::Unauthorized(_) => "Unauthorized",
            Error::Denied { .. } => "Denied",
            Error::ToolNotFound(_) => "ToolNotFound",
            Error::ToolTimeout(_) => "ToolTimeout",
            Error::ToolFailed(_) => "ToolFailed",
            Error::AgentUnreachable(_) => "AgentUnreachable",
            Error::AgentFailed(_) => "AgentFailed",
            Error::Overloaded(_) => "Overloaded",
            Error::TimedOut(_) => "TimedOut",
            Error::Config(_) => "ConfigError",
            Error::Internal(_) => "Internal",
        }
    }

    /// The policy subcode, when this is a `Denied` error.
    pub fn subcode(&self) -> Option<DenySubcode> {
        match self {
            Error::Denied { subcode, .. } => Some(*subcode),
            _ => None,
        }
    }

    /// Whether the agent client may retry this failure within one invocation.
    ///
    /// Policy denials and validation failures are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::AgentUnreachable(_) | Error::Overloaded(_))
    }

    /// Wrap this error in the structured wire envelope.
    pub fn envelope(&self, transaction_id: &str) -> ErrorEnvelope {
        ErrorEnvelope {
            kind: self.kind().to_owned(),
            message: self.to_string(),
            subcode: self.subcode().map(|s| s.as_str().to_owned()),
            transaction_id: transaction_id.to_owned(),
        }
    }
}

/// Structured error shape surfaced to callers on every transport.
///
/// Raw server errors never cross the boundary; this envelope does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcode: Option<String>,
    pub transaction_id: String,
}
