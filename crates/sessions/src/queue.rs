//! Bounded per-session event queue.
//!
//! Events carry monotonic sequence numbers; readers hold a cursor (the next
//! sequence to read) and pull everything at or after it. The queue doubles as the
//! retention window for reconnecting transports: a reader that comes back
//! with an old cursor resumes from whatever is still retained.
//!
//! Overflow policy: the oldest non-critical event is evicted and a
//! `backpressure` event is enqueued in its place. Critical events (terminal
//! events and `backpressure` itself) are never dropped, even if that lets
//! the queue temporarily exceed its capacity.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use am_domain::event::SessionEvent;

/// An event with its session-scoped sequence number.
#[derive(Debug, Clone)]
pub struct SeqEvent {
    pub seq: u64,
    pub event: SessionEvent,
}

struct QueueInner {
    next_seq: u64,
    items: VecDeque<SeqEvent>,
    /// Total events dropped over the queue's lifetime.
    dropped: u64,
}

pub struct EventQueue {
    capacity: usize,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(QueueInner {
                next_seq: 0,
                items: VecDeque::new(),
                dropped: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Append an event, evicting under backpressure if needed.
    /// Returns the event's sequence number.
    pub fn enqueue(&self, event: SessionEvent) -> u64 {
        let mut q = self.inner.lock();

        if q.items.len() >= self.capacity {
            if let Some(pos) = q.items.iter().position(|e| !e.event.is_critical()) {
                q.items.remove(pos);
                q.dropped += 1;
                let dropped = q.dropped;
                let seq = q.next_seq;
                q.next_seq += 1;
                q.items.push_back(SeqEvent {
                    seq,
                    event: SessionEvent::Backpressure { dropped },
                });
            }
            // All retained events critical: grow past capacity rather than
            // lose a terminal event.
        }

        let seq = q.next_seq;
        q.next_seq += 1;
        q.items.push_back(SeqEvent { seq, event });
        drop(q);

        self.notify.notify_waiters();
        seq
    }

    /// Events currently retained after `cursor`, without blocking.
    pub fn peek_after(&self, cursor: u64) -> Vec<SeqEvent> {
        self.inner
            .lock()
            .items
            .iter()
            .filter(|e| e.seq >= cursor)
            .cloned()
            .collect()
    }

    /// Blocking pull: wait until at least one event after `cursor` is
    /// available, then return all of them plus the advanced cursor.
    ///
    /// Returns `(vec![], cursor)` unchanged when `cancel` fires first.
    pub async fn read_after(
        &self,
        cursor: u64,
        cancel: &CancellationToken,
    ) -> (Vec<SeqEvent>, u64) {
        loop {
            // Register interest before checking, so an enqueue racing with
            // the check still wakes us.
            let notified = self.notify.notified();

            let ready = self.peek_after(cursor);
            if !ready.is_empty() {
                let next = ready.last().map(|e| e.seq + 1).unwrap_or(cursor);
                return (ready, next);
            }

            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => return (Vec::new(), cursor),
            }
        }
    }

    /// Total events dropped under backpressure.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use am_domain::event::Phase;
    use serde_json::Value;

    fn status() -> SessionEvent {
        SessionEvent::Status {
            phase: Phase::Planning,
            info: Value::Null,
        }
    }

    fn complete() -> SessionEvent {
        SessionEvent::Complete { result: Value::Null }
    }

    #[test]
    fn sequence_numbers_are_monotonic() {
        let q = EventQueue::new(8);
        let a = q.enqueue(status());
        let b = q.enqueue(status());
        let c = q.enqueue(complete());
        assert!(a < b && b < c);
    }

    #[test]
    fn peek_respects_cursor() {
        let q = EventQueue::new(8);
        q.enqueue(status());
        let second = q.enqueue(status());
        let after = q.peek_after(second);
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].seq, second);
    }

    #[test]
    fn overflow_drops_oldest_non_critical_and_flags_backpressure() {
        let q = EventQueue::new(4);
        for _ in 0..4 {
            q.enqueue(status());
        }
        // Fifth enqueue overflows: one status dropped, backpressure added.
        q.enqueue(status());

        assert_eq!(q.dropped(), 1);
        let all = q.peek_after(0);
        assert!(all
            .iter()
            .any(|e| matches!(e.event, SessionEvent::Backpressure { dropped: 1 })));
        // Seq 0 (the first status) is gone.
        assert!(all.iter().all(|e| e.seq != 0));
    }

    #[test]
    fn terminal_events_survive_overflow() {
        let q = EventQueue::new(2);
        q.enqueue(complete());
        q.enqueue(complete());
        // Queue is full of critical events; new enqueues must not evict them.
        q.enqueue(status());
        let all = q.peek_after(0);
        let criticals = all.iter().filter(|e| e.event.is_critical()).count();
        assert_eq!(criticals, 2);
        assert_eq!(q.dropped(), 0);
    }

    #[tokio::test]
    async fn read_after_wakes_on_enqueue() {
        let q = std::sync::Arc::new(EventQueue::new(8));
        let cancel = CancellationToken::new();

        let reader = {
            let q = q.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { q.read_after(0, &cancel).await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        q.enqueue(status());

        let (events, next) = reader.await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(next, 1);
    }

    #[tokio::test]
    async fn read_after_returns_on_cancel() {
        let q = EventQueue::new(8);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (events, next) = q.read_after(5, &cancel).await;
        assert!(events.is_empty());
        assert_eq!(next, 5);
    }

    #[tokio::test]
    async fn deliveries_are_a_prefix_of_enqueues() {
        // Invariant: what a reader sees is the enqueue sequence with no
        // reordering and no duplication; gaps only where drops emitted
        // backpressure.
        let q = EventQueue::new(64);
        for _ in 0..32 {
            q.enqueue(status());
        }
        let cancel = CancellationToken::new();
        let (first, cursor) = q.read_after(0, &cancel).await;
        let seqs: Vec<u64> = first.iter().map(|e| e.seq).collect();
        let mut sorted = seqs.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(seqs, sorted, "no reordering, no duplication");

        q.enqueue(complete());
        let (second, _) = q.read_after(cursor, &cancel).await;
        assert!(second.iter().all(|e| e.seq >= cursor));
    }
}
