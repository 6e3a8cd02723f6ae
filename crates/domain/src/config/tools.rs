use serde::{Deserialize, Serialize};

/// Tool server bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Deadline for a tool call when policy supplies no execution budget.
    #[serde(default = "d_default_timeout")]
    pub default_timeout_seconds: u64,
    /// Max concurrent calls per adapter; excess callers are rejected.
    #[serde(default = "d_max_in_flight")]
    pub max_in_flight_per_adapter: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: d_default_timeout(),
            max_in_flight_per_adapter: d_max_in_flight(),
        }
    }
}

fn d_default_timeout() -> u64 {
    30
}
fn d_max_in_flight() -> usize {
    8
}
