use serde::{Deserialize, Serialize};

/// Outbound agent client retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentClientConfig {
    /// Retry attempts on transient failures within one invocation.
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
    /// Base of the exponential backoff: `base * 2^attempt`, full jitter.
    #[serde(default = "d_backoff_base")]
    pub backoff_base_ms: u64,
    /// Backoff delay cap.
    #[serde(default = "d_backoff_cap")]
    pub backoff_cap_ms: u64,
}

impl Default for AgentClientConfig {
    fn default() -> Self {
        Self {
            max_retries: d_max_retries(),
            backoff_base_ms: d_backoff_base(),
            backoff_cap_ms: d_backoff_cap(),
        }
    }
}

fn d_max_retries() -> u32 {
    3
}
fn d_backoff_base() -> u64 {
    250
}
fn d_backoff_cap() -> u64 {
    4000
}
