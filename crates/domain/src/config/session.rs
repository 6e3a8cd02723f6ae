use serde::{Deserialize, Serialize};

/// Session store tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Absolute session lifetime from creation.
    #[serde(default = "d_ttl")]
    pub ttl_seconds: u64,
    /// A session idle for longer than this is closed by the sweep.
    #[serde(default = "d_idle")]
    pub idle_timeout_seconds: u64,
    /// Bounded capacity of each session's event queue.
    #[serde(default = "d_queue_capacity")]
    pub event_queue_capacity: usize,
    /// Interval of the background expiry sweep.
    #[serde(default = "d_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Message log bound per session; oldest entries are trimmed first.
    #[serde(default = "d_message_log_limit")]
    pub message_log_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: d_ttl(),
            idle_timeout_seconds: d_idle(),
            event_queue_capacity: d_queue_capacity(),
            sweep_interval_seconds: d_sweep_interval(),
            message_log_limit: d_message_log_limit(),
        }
    }
}

fn d_ttl() -> u64 {
    3600
}
fn d_idle() -> u64 {
    1800
}
fn d_queue_capacity() -> usize {
    256
}
fn d_sweep_interval() -> u64 {
    60
}
fn d_message_log_limit() -> usize {
    1000
}
