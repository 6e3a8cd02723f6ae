//! Session event types.
//!
//! Events flow through each session's bounded queue and are delivered on
//! every connected transport in enqueue order. Payload shapes are stable
//! and evolve additively only.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorEnvelope;

/// Role of a message in the session log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Agent,
    System,
}

/// Progress phase reported by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Dispatching,
    AgentStart,
    AgentComplete,
    Iteration,
    Complete,
}

/// An event pushed to a session's queue.
///
/// `Complete`, `Error`, and `Closed` are terminal: they end the session's
/// current response stream and nothing non-terminal for the same logical
/// request follows them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Status {
        phase: Phase,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        info: Value,
    },
    Message {
        role: MessageRole,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    Error(ErrorEnvelope),
    /// Terminal: the aggregated orchestration result.
    Complete {
        result: Value,
    },
    /// Terminal: the session itself was closed.
    Closed,
    /// The queue overflowed and non-critical events were dropped.
    Backpressure {
        dropped: u64,
    },
}

impl SessionEvent {
    /// Terminal events end the current response stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::Complete { .. } | SessionEvent::Error(_) | SessionEvent::Closed
        )
    }

    /// Critical events are never dropped under backpressure.
    pub fn is_critical(&self) -> bool {
        self.is_terminal() || matches!(self, SessionEvent::Backpressure { .. })
    }

    /// The wire tag, used as the SSE event name and in trace output.
    pub fn type_name(&self) -> &'static str {
        match self {
            SessionEvent::Status { .. } => "status",
            SessionEvent::Message { .. } => "message",
            SessionEvent::Error(_) => "error",
            SessionEvent::Complete { .. } => "complete",
            SessionEvent::Closed => "closed",
            SessionEvent::Backpressure { .. } => "backpressure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_and_critical_classification() {
        let complete = SessionEvent::Complete { result: Value::Null };
        let status = SessionEvent::Status {
            phase: Phase::Planning,
            info: Value::Null,
        };
        let backpressure = SessionEvent::Backpressure { dropped: 3 };

        assert!(complete.is_terminal());
        assert!(complete.is_critical());
        assert!(!status.is_terminal());
        assert!(!status.is_critical());
        assert!(!backpressure.is_terminal());
        assert!(backpressure.is_critical());
        assert!(SessionEvent::Closed.is_terminal());
    }

    #[test]
    fn status_event_wire_shape() {
        let ev = SessionEvent::Status {
            phase: Phase::AgentStart,
            info: serde_json::json!({ "agent": "A1" }),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["phase"], "agent_start");
        assert_eq!(json["info"]["agent"], "A1");
    }

    #[test]
    fn status_event_omits_null_info() {
        let ev = SessionEvent::Status {
            phase: Phase::Planning,
            info: Value::Null,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert!(json.get("info").is_none());
    }

    #[test]
    fn type_names_match_tags() {
        let ev = SessionEvent::Closed;
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], ev.type_name());
    }
}
