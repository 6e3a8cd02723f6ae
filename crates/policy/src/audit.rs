//! In-memory audit trail with an optional external sink.
//!
//! Entries are append-only, bounded by count and age. Durability across
//! restarts is the sink's concern, not this log's.

use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

/// One recorded policy evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub transaction_id: String,
    pub timestamp: DateTime<Utc>,
    /// User id when known, otherwise the role.
    pub subject_id: String,
    pub role: String,
    pub resource_kind: String,
    pub resource_id: String,
    pub operation: String,
    /// Decision reason string (`AllowListed`, `DefaultDeny`, …).
    pub decision: String,
    pub allowed: bool,
    pub latency_ms: u64,
}

/// Receives every audit entry as it is appended.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Sink that mirrors entries into the structured log.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: &AuditEntry) {
        let json = serde_json::to_string(entry).unwrap_or_default();
        tracing::info!(audit = %json, "am_audit");
    }
}

pub struct AuditLog {
    max_entries: usize,
    max_age: ChronoDuration,
    entries: Mutex<VecDeque<AuditEntry>>,
    sink: Option<Arc<dyn AuditSink>>,
}

impl AuditLog {
    pub fn new(max_entries: usize, max_age_seconds: u64) -> Self {
        Self {
            max_entries,
            max_age: ChronoDuration::seconds(max_age_seconds as i64),
            entries: Mutex::new(VecDeque::new()),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn append(&self, entry: AuditEntry) {
        if let Some(sink) = &self.sink {
            sink.record(&entry);
        }

        let mut entries = self.entries.lock();
        let cutoff = Utc::now() - self.max_age;
        while entries.front().is_some_and(|e| e.timestamp < cutoff) {
            entries.pop_front();
        }
        if entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Most recent entries, newest last.
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    /// All entries recorded for one transaction.
    pub fn for_transaction(&self, transaction_id: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.transaction_id == transaction_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
