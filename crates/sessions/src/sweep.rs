//! Background expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::store::SessionStore;

/// Spawn the store's expiry sweep: one background task per process, running
/// at a fixed interval until `shutdown` fires. Readers are never blocked —
/// each pass works on a snapshot.
pub fn spawn_sweeper(
    store: Arc<SessionStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let (closed, removed) = store.sweep(Utc::now());
                    if closed > 0 || removed > 0 {
                        tracing::info!(closed, removed, "session sweep");
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!("session sweeper stopped");
                    return;
                }
            }
        }
    })
}
