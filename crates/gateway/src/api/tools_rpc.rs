//! Tool-server protocol endpoint.
//!
//! `POST /v1/tools/rpc` speaks the uniform envelope:
//! `{ id, method: "tools/list" | "tools/call", params }` →
//! `{ id, result? | error: { code, message } }`.
//! Authentication happens inside `tools/call` via `params.auth_token`,
//! so specialized agents need no gateway session.

use axum::extract::State;
use axum::response::Json;

use am_protocol::{
    error_code, RpcRequest, RpcResponse, ToolCallParams, CODE_INVALID_PARAMS,
    CODE_METHOD_NOT_FOUND, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};

use crate::state::AppState;

pub async fn rpc(State(state): State<AppState>, Json(request): Json<RpcRequest>) -> Json<RpcResponse> {
    let id = request.id.clone();
    let response = match request.method.as_str() {
        METHOD_TOOLS_LIST => RpcResponse::ok(
            id,
            serde_json::json!({ "tools": state.tools.list() }),
        ),
        METHOD_TOOLS_CALL => {
            let params: ToolCallParams = match serde_json::from_value(request.params) {
                Ok(params) => params,
                Err(e) => {
                    return Json(RpcResponse::err(
                        id,
                        CODE_INVALID_PARAMS,
                        format!("bad tools/call params: {e}"),
                    ))
                }
            };
            match state
                .tools
                .call(&params.name, params.arguments, Some(&params.auth_token), None)
                .await
            {
                Ok(result) => match serde_json::to_value(&result) {
                    Ok(value) => RpcResponse::ok(id, value),
                    Err(e) => RpcResponse::err(id, error_code("Internal"), e.to_string()),
                },
                Err(e) => RpcResponse::err(id, error_code(e.kind()), e.to_string()),
            }
        }
        other => RpcResponse::err(
            id,
            CODE_METHOD_NOT_FOUND,
            format!("unknown method \"{other}\""),
        ),
    };
    Json(response)
}
