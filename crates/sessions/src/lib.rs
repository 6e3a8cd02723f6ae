//! Ephemeral session state: keyed store with TTL and idle expiry, per-session
//! message logs, and bounded event queues for push delivery.

pub mod queue;
pub mod store;
pub mod sweep;

pub use queue::{EventQueue, SeqEvent};
pub use store::{Message, SessionMeta, SessionStatus, SessionStore};
pub use sweep::spawn_sweeper;
