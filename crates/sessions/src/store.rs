//! Keyed session store with TTL and idle expiry.
//!
//! Sessions are owned by this store and reached by id only; no component
//! holds a direct reference into another session. Each session carries an
//! append-only message log and a bounded event queue.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use am_domain::config::SessionConfig;
use am_domain::error::{Error, Result};
use am_domain::event::{MessageRole, SessionEvent};
use am_domain::telemetry::TraceEvent;

use crate::queue::{EventQueue, SeqEvent};

/// How long a closed session stays around so connected transports can
/// drain the `closed` terminal event.
const DRAIN_GRACE_SECONDS: i64 = 30;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An entry in a session's append-only message log. Never mutated after
/// emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    fn new(role: MessageRole, content: impl Into<String>, metadata: Option<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content, None)
    }

    pub fn agent(content: impl Into<String>, metadata: Option<Value>) -> Self {
        Self::new(MessageRole::Agent, content, metadata)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content, None)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Processing,
    Closed,
}

/// Snapshot of a session's metadata, as returned by inspection APIs.
#[derive(Debug, Clone, Serialize)]
pub struct SessionMeta {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_touched: DateTime<Utc>,
    pub status: SessionStatus,
    pub message_count: usize,
}

struct SessionInner {
    user_id: Option<String>,
    created_at: DateTime<Utc>,
    last_touched: DateTime<Utc>,
    status: SessionStatus,
    messages: Vec<Message>,
    delete_after: Option<DateTime<Utc>>,
}

struct Slot {
    id: String,
    inner: Mutex<SessionInner>,
    queue: EventQueue,
}

impl Slot {
    fn meta(&self) -> SessionMeta {
        let inner = self.inner.lock();
        SessionMeta {
            id: self.id.clone(),
            user_id: inner.user_id.clone(),
            created_at: inner.created_at,
            last_touched: inner.last_touched,
            status: inner.status,
            message_count: inner.messages.len(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory keyed session store. Sufficient for single-instance
/// operation; multi-instance deployments put a shared key-value store
/// behind the same interface.
pub struct SessionStore {
    cfg: SessionConfig,
    sessions: RwLock<HashMap<String, Arc<Slot>>>,
}

impl SessionStore {
    pub fn new(cfg: SessionConfig) -> Self {
        Self {
            cfg,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a fresh session in `idle` status.
    pub fn create(&self, user_id: Option<String>) -> SessionMeta {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let slot = Arc::new(Slot {
            id: id.clone(),
            inner: Mutex::new(SessionInner {
                user_id: user_id.clone(),
                created_at: now,
                last_touched: now,
                status: SessionStatus::Idle,
                messages: Vec::new(),
                delete_after: None,
            }),
            queue: EventQueue::new(self.cfg.event_queue_capacity),
        });
        let meta = slot.meta();
        self.sessions.write().insert(id.clone(), slot);

        TraceEvent::SessionCreated {
            session_id: id,
            user_id,
        }
        .emit();
        meta
    }

    fn slot(&self, session_id: &str) -> Result<Arc<Slot>> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_owned()))
    }

    /// Look up a session; fails for absent or TTL-expired sessions.
    pub fn get(&self, session_id: &str) -> Result<SessionMeta> {
        let slot = self.slot(session_id)?;
        let expired = {
            let inner = slot.inner.lock();
            Utc::now() - inner.created_at > ChronoDuration::seconds(self.cfg.ttl_seconds as i64)
        };
        if expired {
            return Err(Error::SessionExpired(session_id.to_owned()));
        }
        Ok(slot.meta())
    }

    /// The session's message log, oldest first.
    pub fn history(&self, session_id: &str) -> Result<Vec<Message>> {
        let slot = self.slot(session_id)?;
        let inner = slot.inner.lock();
        Ok(inner.messages.clone())
    }

    /// Append to the message log. Fails on closed sessions.
    pub fn append_message(&self, session_id: &str, message: Message) -> Result<()> {
        let slot = self.slot(session_id)?;
        let mut inner = slot.inner.lock();
        if inner.status == SessionStatus::Closed {
            return Err(Error::SessionClosed(session_id.to_owned()));
        }
        inner.messages.push(message);
        inner.last_touched = Utc::now();

        // Keep the log bounded; trim from the front.
        let limit = self.cfg.message_log_limit;
        if inner.messages.len() > limit {
            let excess = inner.messages.len() - limit;
            inner.messages.drain(..excess);
        }
        Ok(())
    }

    /// Atomically transition `idle → processing`. A session already
    /// processing rejects the second request — its own backpressure.
    pub fn try_begin_processing(&self, session_id: &str) -> Result<()> {
        let slot = self.slot(session_id)?;
        let mut inner = slot.inner.lock();
        match inner.status {
            SessionStatus::Closed => Err(Error::SessionClosed(session_id.to_owned())),
            SessionStatus::Processing => Err(Error::Overloaded(format!(
                "session {session_id} is already processing a request"
            ))),
            SessionStatus::Idle => {
                inner.status = SessionStatus::Processing;
                inner.last_touched = Utc::now();
                Ok(())
            }
        }
    }

    /// Transition `processing → idle`. No-op for closed sessions.
    pub fn end_processing(&self, session_id: &str) {
        if let Ok(slot) = self.slot(session_id) {
            let mut inner = slot.inner.lock();
            if inner.status == SessionStatus::Processing {
                inner.status = SessionStatus::Idle;
                inner.last_touched = Utc::now();
            }
        }
    }

    /// Push an event to the session's queue. Works on closed sessions too:
    /// closure never rolls back or blocks emitted events.
    pub fn enqueue_event(&self, session_id: &str, event: SessionEvent) -> Result<u64> {
        let slot = self.slot(session_id)?;
        let dropped_before = slot.queue.dropped();
        let seq = slot.queue.enqueue(event);
        let dropped_after = slot.queue.dropped();
        if dropped_after > dropped_before {
            TraceEvent::EventDropped {
                session_id: session_id.to_owned(),
                dropped_total: dropped_after,
            }
            .emit();
        }
        Ok(seq)
    }

    /// Blocking pull of events after `cursor`; returns the events in order
    /// plus the advanced cursor. Returns empty on cancellation.
    pub async fn dequeue_events(
        &self,
        session_id: &str,
        cursor: u64,
        cancel: &CancellationToken,
    ) -> Result<(Vec<SeqEvent>, u64)> {
        let slot = self.slot(session_id)?;
        Ok(slot.queue.read_after(cursor, cancel).await)
    }

    /// Non-blocking read of retained events after `cursor`.
    pub fn peek_events(&self, session_id: &str, cursor: u64) -> Result<Vec<SeqEvent>> {
        let slot = self.slot(session_id)?;
        Ok(slot.queue.peek_after(cursor))
    }

    /// Close a session: terminal status, a `closed` event for every
    /// connected transport, then deletion after a drain grace. Idempotent.
    pub fn close(&self, session_id: &str, reason: &str) -> Result<()> {
        let slot = self.slot(session_id)?;
        {
            let mut inner = slot.inner.lock();
            if inner.status == SessionStatus::Closed {
                return Ok(());
            }
            inner.status = SessionStatus::Closed;
            inner.last_touched = Utc::now();
            inner.delete_after =
                Some(Utc::now() + ChronoDuration::seconds(DRAIN_GRACE_SECONDS));
        }
        slot.queue.enqueue(SessionEvent::Closed);

        TraceEvent::SessionClosed {
            session_id: session_id.to_owned(),
            reason: reason.to_owned(),
        }
        .emit();
        Ok(())
    }

    /// One expiry pass: close TTL/idle-expired sessions, delete closed
    /// sessions past their drain grace. Returns `(closed, removed)`.
    pub fn sweep(&self, now: DateTime<Utc>) -> (usize, usize) {
        let ttl = ChronoDuration::seconds(self.cfg.ttl_seconds as i64);
        let idle = ChronoDuration::seconds(self.cfg.idle_timeout_seconds as i64);

        let snapshot: Vec<Arc<Slot>> = self.sessions.read().values().cloned().collect();

        let mut to_close: Vec<(String, &'static str)> = Vec::new();
        let mut to_remove: Vec<String> = Vec::new();

        for slot in &snapshot {
            let inner = slot.inner.lock();
            match inner.status {
                SessionStatus::Closed => {
                    if inner.delete_after.is_some_and(|t| now >= t) {
                        to_remove.push(slot.id.clone());
                    }
                }
                _ => {
                    if now - inner.created_at > ttl {
                        to_close.push((slot.id.clone(), "ttl_expired"));
                    } else if now - inner.last_touched > idle {
                        to_close.push((slot.id.clone(), "idle_timeout"));
                    }
                }
            }
        }

        let closed = to_close.len();
        for (id, reason) in to_close {
            let _ = self.close(&id, reason);
        }

        let removed = to_remove.len();
        if removed > 0 {
            let mut sessions = self.sessions.write();
            for id in &to_remove {
                sessions.remove(id);
            }
        }

        (closed, removed)
    }

    /// Session metadata snapshots, for the health endpoint.
    pub fn list(&self) -> Vec<SessionMeta> {
        self.sessions.read().values().map(|s| s.meta()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use am_domain::event::Phase;

    fn make_store() -> SessionStore {
        SessionStore::new(SessionConfig::default())
    }

    fn status_event() -> SessionEvent {
        SessionEvent::Status {
            phase: Phase::Planning,
            info: Value::Null,
        }
    }

    #[test]
    fn create_and_get() {
        let store = make_store();
        let meta = store.create(Some("alice".into()));
        assert_eq!(meta.status, SessionStatus::Idle);

        let fetched = store.get(&meta.id).unwrap();
        assert_eq!(fetched.id, meta.id);
        assert_eq!(fetched.user_id.as_deref(), Some("alice"));
        assert!(fetched.last_touched >= fetched.created_at);
    }

    #[test]
    fn get_unknown_session_fails() {
        let store = make_store();
        let err = store.get("nope").unwrap_err();
        assert_eq!(err.kind(), "SessionNotFound");
    }

    #[test]
    fn append_and_history() {
        let store = make_store();
        let meta = store.create(None);
        store.append_message(&meta.id, Message::user("hello")).unwrap();
        store
            .append_message(&meta.id, Message::agent("hi", None))
            .unwrap();

        let log = store.history(&meta.id).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].role, MessageRole::User);
        assert_eq!(log[1].role, MessageRole::Agent);
    }

    #[test]
    fn append_to_closed_session_fails() {
        let store = make_store();
        let meta = store.create(None);
        store.close(&meta.id, "test").unwrap();
        let err = store
            .append_message(&meta.id, Message::user("too late"))
            .unwrap_err();
        assert_eq!(err.kind(), "SessionClosed");
    }

    #[test]
    fn message_log_is_bounded() {
        let store = SessionStore::new(SessionConfig {
            message_log_limit: 3,
            ..SessionConfig::default()
        });
        let meta = store.create(None);
        for i in 0..5 {
            store
                .append_message(&meta.id, Message::user(format!("m{i}")))
                .unwrap();
        }
        let log = store.history(&meta.id).unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].content, "m2");
        assert_eq!(log[2].content, "m4");
    }

    #[test]
    fn processing_transition_is_exclusive() {
        let store = make_store();
        let meta = store.create(None);

        store.try_begin_processing(&meta.id).unwrap();
        let err = store.try_begin_processing(&meta.id).unwrap_err();
        assert_eq!(err.kind(), "Overloaded");

        store.end_processing(&meta.id);
        store.try_begin_processing(&meta.id).unwrap();
    }

    #[test]
    fn processing_on_closed_session_fails() {
        let store = make_store();
        let meta = store.create(None);
        store.close(&meta.id, "test").unwrap();
        let err = store.try_begin_processing(&meta.id).unwrap_err();
        assert_eq!(err.kind(), "SessionClosed");
    }

    #[test]
    fn close_is_terminal_and_idempotent() {
        let store = make_store();
        let meta = store.create(None);
        store.close(&meta.id, "client request").unwrap();
        store.close(&meta.id, "again").unwrap();

        let events = store.peek_events(&meta.id, 0).unwrap();
        let closed_count = events
            .iter()
            .filter(|e| matches!(e.event, SessionEvent::Closed))
            .count();
        assert_eq!(closed_count, 1, "closed event flushed exactly once");

        let meta = store.get(&meta.id).unwrap();
        assert_eq!(meta.status, SessionStatus::Closed);
    }

    #[test]
    fn events_flow_after_close() {
        // Closure never rolls back or blocks emitted events.
        let store = make_store();
        let meta = store.create(None);
        store.close(&meta.id, "test").unwrap();
        store.enqueue_event(&meta.id, status_event()).unwrap();
        assert_eq!(store.peek_events(&meta.id, 0).unwrap().len(), 2);
    }

    #[test]
    fn ttl_expired_session_is_reported_expired() {
        let store = SessionStore::new(SessionConfig {
            ttl_seconds: 1,
            ..SessionConfig::default()
        });
        let meta = store.create(None);
        {
            // Backdate creation past the TTL.
            let slot = store.slot(&meta.id).unwrap();
            slot.inner.lock().created_at = Utc::now() - ChronoDuration::seconds(5);
        }
        let err = store.get(&meta.id).unwrap_err();
        assert_eq!(err.kind(), "SessionExpired");
    }

    #[test]
    fn sweep_closes_expired_and_removes_drained() {
        let store = SessionStore::new(SessionConfig {
            ttl_seconds: 10,
            idle_timeout_seconds: 5,
            ..SessionConfig::default()
        });
        let fresh = store.create(None);
        let idle = store.create(None);
        {
            let slot = store.slot(&idle.id).unwrap();
            slot.inner.lock().last_touched = Utc::now() - ChronoDuration::seconds(60);
        }

        let (closed, removed) = store.sweep(Utc::now());
        assert_eq!(closed, 1);
        assert_eq!(removed, 0);
        assert_eq!(store.get(&idle.id).unwrap().status, SessionStatus::Closed);
        assert_eq!(store.get(&fresh.id).unwrap().status, SessionStatus::Idle);

        // Past the drain grace the closed session is deleted.
        let later = Utc::now() + ChronoDuration::seconds(DRAIN_GRACE_SECONDS + 1);
        let (_, removed) = store.sweep(later);
        assert_eq!(removed, 1);
        assert_eq!(store.get(&idle.id).unwrap_err().kind(), "SessionNotFound");
    }

    #[tokio::test]
    async fn dequeue_returns_events_in_order() {
        let store = make_store();
        let meta = store.create(None);
        store.enqueue_event(&meta.id, status_event()).unwrap();
        store
            .enqueue_event(&meta.id, SessionEvent::Complete { result: Value::Null })
            .unwrap();

        let cancel = CancellationToken::new();
        let (events, cursor) = store.dequeue_events(&meta.id, 0, &cancel).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].seq < events[1].seq);
        assert_eq!(cursor, events[1].seq + 1);
    }
}
