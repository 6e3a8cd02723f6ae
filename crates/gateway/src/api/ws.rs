//! Bidirectional socket transport.
//!
//! Flow:
//! 1. Client connects to `/v1/ws?session_id=<id>&token=<token>`
//!    (a missing or unknown session id gets a fresh session)
//! 2. Gateway sends `connected` with the session id
//! 3. An event pump forwards the session's queue as frames; inbound
//!    frames are `message`, `ping`, `get_history`, `close`
//!
//! A transport disconnect never closes the session; only an explicit
//! `close` frame, TTL, or idle timeout does.

use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use am_domain::auth::ResolvedIdentity;
use am_domain::event::SessionEvent;
use am_domain::TransactionContext;
use am_protocol::{ClientFrame, ControlFrame, ServerFrame};
use am_scheduler::RequestContext;

use crate::api::bearer;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub session_id: Option<String>,
    /// Bearer token for clients that cannot set headers.
    #[serde(default)]
    pub token: Option<String>,
}

pub async fn ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> Response {
    let token = query.token.as_deref().or_else(|| bearer(&headers));
    let identity = match state.auth.resolve(token) {
        Ok(identity) => identity,
        Err(_) => {
            return (
                axum::http::StatusCode::UNAUTHORIZED,
                "invalid or missing token",
            )
                .into_response()
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, identity, query.session_id))
        .into_response()
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    identity: ResolvedIdentity,
    requested_session: Option<String>,
) {
    // Resolve or implicitly create the session.
    let session_id = match requested_session {
        Some(id) if state.sessions.get(&id).is_ok() => id,
        _ => state.sessions.create(identity.user_id.clone()).id,
    };

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerFrame>(64);

    // Writer task: forwards outbound frames to the WS sink.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if send_frame(&mut ws_sink, &frame).await.is_err() {
                break;
            }
        }
    });

    let _ = outbound_tx
        .send(ServerFrame::Control(ControlFrame::Connected {
            session_id: session_id.clone(),
            gateway_version: env!("CARGO_PKG_VERSION").to_string(),
        }))
        .await;

    tracing::info!(session_id = %session_id, "socket client connected");

    // Event pump: session queue → client, stopping after a `closed` event.
    let pump_cancel = state.shutdown.child_token();
    let mut pump = {
        let state = state.clone();
        let session_id = session_id.clone();
        let tx = outbound_tx.clone();
        let cancel = pump_cancel.clone();
        tokio::spawn(async move {
            let mut cursor = 0;
            loop {
                let (events, next) = match state
                    .sessions
                    .dequeue_events(&session_id, cursor, &cancel)
                    .await
                {
                    Ok(batch) => batch,
                    Err(_) => return,
                };
                if events.is_empty() {
                    return; // cancelled
                }
                cursor = next;
                for seq_event in events {
                    let was_closed = matches!(seq_event.event, SessionEvent::Closed);
                    if tx.send(ServerFrame::Event(seq_event.event)).await.is_err() {
                        return;
                    }
                    if was_closed {
                        return;
                    }
                }
            }
        })
    };

    // Reader loop.
    let mut client_closed = false;
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            WsMessage::Text(text) => {
                let frame = match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => frame,
                    Err(_) => {
                        tracing::debug!(session_id = %session_id, "ignoring unparseable frame");
                        continue;
                    }
                };
                if handle_frame(&state, &identity, &session_id, frame, &outbound_tx).await {
                    client_closed = true;
                    break;
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    // Give the pump a moment to flush the terminal `closed` frame.
    if client_closed {
        let _ = tokio::time::timeout(Duration::from_secs(2), &mut pump).await;
    }
    pump_cancel.cancel();
    pump.abort();
    writer.abort();
    tracing::info!(session_id = %session_id, "socket client disconnected");
}

/// Process one inbound frame. Returns `true` when the client asked to
/// close the session.
async fn handle_frame(
    state: &AppState,
    identity: &ResolvedIdentity,
    session_id: &str,
    frame: ClientFrame,
    tx: &mpsc::Sender<ServerFrame>,
) -> bool {
    match frame {
        ClientFrame::Ping => {
            let _ = tx.send(ServerFrame::Control(ControlFrame::Pong)).await;
            false
        }
        ClientFrame::GetHistory => {
            let messages = state
                .sessions
                .history(session_id)
                .unwrap_or_default()
                .iter()
                .filter_map(|m| serde_json::to_value(m).ok())
                .collect();
            let _ = tx
                .send(ServerFrame::Control(ControlFrame::History { messages }))
                .await;
            false
        }
        ClientFrame::Close => {
            let _ = state.sessions.close(session_id, "client request");
            true
        }
        ClientFrame::Message { content, context } => {
            let context: RequestContext = if context.is_null() {
                RequestContext::default()
            } else {
                match serde_json::from_value(context) {
                    Ok(ctx) => ctx,
                    Err(e) => {
                        let err = am_domain::Error::InvalidRequest(format!("bad context: {e}"));
                        let _ = tx
                            .send(ServerFrame::Event(SessionEvent::Error(err.envelope(""))))
                            .await;
                        return false;
                    }
                }
            };

            let ctx =
                TransactionContext::root(session_id, identity.user_id.clone(), &identity.role);
            let orchestrator = state.orchestrator.clone();
            let cancel = state.shutdown.child_token();
            let tx = tx.clone();

            // Run in the background; progress flows through the event
            // pump. Failures raised before processing started never reach
            // the queue, so those are answered on this socket directly.
            tokio::spawn(async move {
                if let Err(err) = orchestrator
                    .handle_message(&ctx, &content, context, cancel)
                    .await
                {
                    let pre_processing = matches!(
                        err,
                        am_domain::Error::SessionNotFound(_)
                            | am_domain::Error::SessionExpired(_)
                            | am_domain::Error::SessionClosed(_)
                            | am_domain::Error::Overloaded(_)
                    );
                    if pre_processing {
                        let _ = tx
                            .send(ServerFrame::Event(SessionEvent::Error(
                                err.envelope(&ctx.transaction_id),
                            )))
                            .await;
                    }
                }
            });
            false
        }
    }
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, WsMessage>,
    frame: &ServerFrame,
) -> Result<(), ()> {
    let json = serde_json::to_string(frame).map_err(|_| ())?;
    sink.send(WsMessage::Text(json)).await.map_err(|_| ())
}
