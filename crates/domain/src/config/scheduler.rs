use serde::{Deserialize, Serialize};

/// Orchestration scheduler bounds and defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Max concurrent agent invocations within one parallel pattern.
    #[serde(default = "d_parallel_max")]
    pub parallel_max_in_flight: usize,
    /// Max concurrent agent invocations across the whole process.
    #[serde(default = "d_process_max")]
    pub process_max_in_flight: usize,
    /// Invocations queued beyond the process bound before rejecting
    /// with `Overloaded`.
    #[serde(default = "d_queue_overflow")]
    pub queue_overflow_limit: usize,
    /// Default per-request deadline when neither the caller nor the plan
    /// supplies one.
    #[serde(default = "d_default_timeout")]
    pub default_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallel_max_in_flight: d_parallel_max(),
            process_max_in_flight: d_process_max(),
            queue_overflow_limit: d_queue_overflow(),
            default_timeout_seconds: d_default_timeout(),
        }
    }
}

fn d_parallel_max() -> usize {
    16
}
fn d_process_max() -> usize {
    256
}
fn d_queue_overflow() -> usize {
    1024
}
fn d_default_timeout() -> u64 {
    60
}
