//! Wire protocol: socket frames, the tool-server RPC envelope, and the
//! agent invocation shapes.
//!
//! Everything here is serde-tagged JSON. Payloads are stable and evolve
//! additively only — removing or renaming a field is a breaking protocol
//! change.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use am_domain::event::SessionEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket frames (client ↔ gateway)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Client → gateway socket frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Submit a message for orchestration.
    Message {
        content: String,
        /// Optional request context with orchestration overrides.
        #[serde(default, skip_serializing_if = "Value::is_null")]
        context: Value,
    },
    /// Heartbeat; answered with `pong`.
    Ping,
    /// Request the session's message log.
    GetHistory,
    /// Close the session.
    Close,
}

/// Gateway → client socket frame.
///
/// Session events pass through untagged so their own `type` field is the
/// frame tag on the wire (`status`, `message`, `error`, `complete`,
/// `closed`, `backpressure`).
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Control(ControlFrame),
    Event(SessionEvent),
}

/// Non-event server frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Connected {
        session_id: String,
        gateway_version: String,
    },
    Pong,
    History {
        messages: Vec<Value>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-server RPC envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Uniform request envelope for the tool-server protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Uniform response envelope. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Unknown or malformed method.
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
/// Malformed params.
pub const CODE_INVALID_PARAMS: i64 = -32602;

/// Stable numeric code for an error kind surfaced through the envelope.
pub fn error_code(kind: &str) -> i64 {
    match kind {
        "Unauthorized" => 1001,
        "Denied" => 1003,
        "ToolNotFound" => 2001,
        "ToolTimeout" => 2002,
        "ToolFailed" => 2003,
        "Overloaded" => 3001,
        "TimedOut" => 3002,
        "InvalidRequest" => 4001,
        _ => 5000, // Internal
    }
}

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    pub auth_token: String,
}

/// One entry of a `tools/list` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON-schema-shaped description of the tool's input parameters.
    pub input_schema: Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent invocation wire shapes (A2A)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Body POSTed to a specialized agent's `/invoke` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct A2aRequest {
    pub input: String,
    #[serde(default)]
    pub parameters: Value,
    /// Prior step outputs, populated by sequential patterns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_results: Vec<Value>,
    /// Remaining time budget the agent should honor.
    pub timeout_ms: u64,
}

/// Body a specialized agent returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct A2aResponse {
    /// `"success"` or `"failed"`.
    pub status: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use am_domain::event::Phase;

    #[test]
    fn client_frame_round_trip() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"message","content":"find users","context":{"agents":["A1"]}}"#,
        )
        .unwrap();
        match frame {
            ClientFrame::Message { content, context } => {
                assert_eq!(content, "find users");
                assert_eq!(context["agents"][0], "A1");
            }
            other => panic!("expected Message, got {other:?}"),
        }

        let ping: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(ping, ClientFrame::Ping));
    }

    #[test]
    fn server_event_frame_keeps_event_tag() {
        let frame = ServerFrame::Event(SessionEvent::Status {
            phase: Phase::Planning,
            info: Value::Null,
        });
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "status");
    }

    #[test]
    fn control_frame_tags() {
        let json = serde_json::to_value(ServerFrame::Control(ControlFrame::Pong)).unwrap();
        assert_eq!(json["type"], "pong");
    }

    #[test]
    fn rpc_response_exclusivity() {
        let ok = RpcResponse::ok(Value::from(1), serde_json::json!({"tools": []}));
        let json = serde_json::to_value(&ok).unwrap();
        assert!(json.get("error").is_none());

        let err = RpcResponse::err(Value::from(2), error_code("ToolNotFound"), "no such tool");
        let json = serde_json::to_value(&err).unwrap();
        assert!(json.get("result").is_none());
        assert_eq!(json["error"]["code"], 2001);
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(error_code("Unauthorized"), 1001);
        assert_eq!(error_code("Denied"), 1003);
        assert_eq!(error_code("ToolTimeout"), 2002);
        assert_eq!(error_code("SomethingNew"), 5000);
    }
}
