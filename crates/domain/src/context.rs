//! Transaction contexts.
//!
//! A [`TransactionContext`] is created at the top of every externally
//! initiated operation and carried through every downstream call. Every log
//! line, trace event, and audit entry references its transaction id, so a
//! single top-level request can be followed across the scheduler, the agent
//! client, and the tool server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionContext {
    pub transaction_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub role: String,
    pub started_at: DateTime<Utc>,
    /// Transaction id of the logical parent, for nested tool calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_transaction_id: Option<String>,
}

impl TransactionContext {
    /// Root context for a top-level request.
    pub fn root(session_id: impl Into<String>, user_id: Option<String>, role: impl Into<String>) -> Self {
        Self {
            transaction_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            user_id,
            role: role.into(),
            started_at: Utc::now(),
            parent_transaction_id: None,
        }
    }

    /// Derive a child context for a nested call. The child gets its own
    /// transaction id and records this context as its logical parent.
    pub fn child(&self) -> Self {
        Self {
            transaction_id: uuid::Uuid::new_v4().to_string(),
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            role: self.role.clone(),
            started_at: Utc::now(),
            parent_transaction_id: Some(self.transaction_id.clone()),
        }
    }

    /// Milliseconds elapsed since this context was created.
    pub fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0) as u64
    }
}
