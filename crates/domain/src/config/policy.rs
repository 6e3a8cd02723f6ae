use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Policy engine settings. The rules themselves live in the policy
/// document; this selects the source and the fallback behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Verdict when no rule matches.
    #[serde(default)]
    pub default: PolicyDefault,
    /// Role assumed for requests with no resolved identity.
    #[serde(default = "d_default_role")]
    pub default_role: String,
    /// Local policy document (TOML). Absent = built-in defaults.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Reload the policy document on SIGHUP.
    #[serde(default = "d_true")]
    pub reload_on_signal: bool,
    /// Bound of the in-memory audit ring.
    #[serde(default = "d_audit_max_entries")]
    pub audit_max_entries: usize,
    /// Audit entries older than this are evicted.
    #[serde(default = "d_audit_max_age")]
    pub audit_max_age_seconds: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default: PolicyDefault::Deny,
            default_role: d_default_role(),
            path: None,
            reload_on_signal: d_true(),
            audit_max_entries: d_audit_max_entries(),
            audit_max_age_seconds: d_audit_max_age(),
        }
    }
}

/// Default verdict for a resource with no matching rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyDefault {
    Allow,
    #[default]
    Deny,
}

fn d_default_role() -> String {
    "user".into()
}
fn d_true() -> bool {
    true
}
fn d_audit_max_entries() -> usize {
    10_000
}
fn d_audit_max_age() -> u64 {
    86_400
}
