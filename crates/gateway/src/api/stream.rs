//! Server-sent-events transport.
//!
//! `GET /v1/stream?session_id=&cursor=` replays retained events from the
//! cursor, then follows the queue live until a terminal event closes the
//! stream. Reconnecting with the last event's id (the SSE `id` field plus
//! one) resumes without gaps while the events are still retained.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::stream::Stream;
use serde::Deserialize;

use crate::api::{bearer, error_response};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub session_id: String,
    /// Next sequence number to read; 0 replays everything retained.
    #[serde(default)]
    pub cursor: u64,
    /// Bearer token for clients that cannot set headers.
    #[serde(default)]
    pub token: Option<String>,
}

pub async fn stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> Response {
    let token = query.token.as_deref().or_else(|| bearer(&headers));
    if let Err(e) = state.auth.resolve(token) {
        return error_response(&e, "");
    }
    if let Err(e) = state.sessions.get(&query.session_id) {
        return error_response(&e, "");
    }

    Sse::new(event_stream(state, query.session_id, query.cursor))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn event_stream(
    state: AppState,
    session_id: String,
    mut cursor: u64,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        let cancel = state.shutdown.child_token();
        'outer: loop {
            let (events, next) = match state
                .sessions
                .dequeue_events(&session_id, cursor, &cancel)
                .await
            {
                Ok(batch) => batch,
                // Session swept away mid-stream.
                Err(_) => break,
            };
            if events.is_empty() {
                // Cancelled: process shutdown.
                break;
            }
            cursor = next;

            for seq_event in events {
                let data = serde_json::to_string(&seq_event.event).unwrap_or_default();
                let terminal = seq_event.event.is_terminal();
                yield Ok(Event::default()
                    .id(seq_event.seq.to_string())
                    .event(seq_event.event.type_name())
                    .data(data));
                if terminal {
                    break 'outer;
                }
            }
        }
    }
}
