use serde::{Deserialize, Serialize};

/// Agent registry settings and optional seed records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// An agent whose last heartbeat is older than this is unreachable.
    #[serde(default = "d_heartbeat_timeout")]
    pub heartbeat_timeout_seconds: u64,
    /// Agents registered at startup, before any self-publication.
    #[serde(default)]
    pub seed: Vec<AgentSeed>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_seconds: d_heartbeat_timeout(),
            seed: Vec::new(),
        }
    }
}

/// A statically configured agent record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSeed {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub endpoint: String,
    #[serde(default = "d_max_capacity")]
    pub max_capacity: u32,
}

fn d_heartbeat_timeout() -> u64 {
    30
}
fn d_max_capacity() -> u32 {
    8
}
