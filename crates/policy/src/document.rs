//! The policy document: an immutable rule set swapped atomically on reload.
//!
//! Documents come from the first non-empty source in the chain: an external
//! provider (if configured), the local TOML file, built-in defaults.
//! Sources are static for a given reload cycle; there is no per-call fetch.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use am_domain::config::PolicyDefault;
use am_domain::error::{Error, Result};

/// Per-role allow/deny lists over agent ids and tool ids.
/// A `"*"` entry matches every id.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoleRules {
    #[serde(default)]
    pub allow_agents: Vec<String>,
    #[serde(default)]
    pub deny_agents: Vec<String>,
    #[serde(default)]
    pub allow_tools: Vec<String>,
    #[serde(default)]
    pub deny_tools: Vec<String>,
}

/// Per-resource restrictions, keyed by agent or tool id.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResourceRestrictions {
    /// Execution budget the scheduler turns into a deadline.
    #[serde(default)]
    pub max_execution_time_ms: Option<u64>,
    /// When present, every supplied parameter key must be listed here.
    #[serde(default)]
    pub allowed_parameters: Option<Vec<String>>,
    /// Parameters that deny the call outright.
    #[serde(default)]
    pub forbidden_parameters: Vec<String>,
    /// Fixed-window (one hour) call budget for this resource.
    #[serde(default)]
    pub rate_limit_per_hour: Option<u32>,
}

/// A complete, immutable policy rule set.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyDocument {
    /// Verdict when no rule matches. Deny unless stated otherwise.
    #[serde(default)]
    pub default: PolicyDefault,
    /// Hourly budget across all callers. Absent = unlimited.
    #[serde(default)]
    pub global_rate_limit_per_hour: Option<u32>,
    /// Hourly budget per user. Absent = unlimited.
    #[serde(default)]
    pub user_rate_limit_per_hour: Option<u32>,
    #[serde(default)]
    pub roles: HashMap<String, RoleRules>,
    #[serde(default)]
    pub resources: HashMap<String, ResourceRestrictions>,
}

impl PolicyDocument {
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(format!("parsing policy document: {e}")))
    }

    /// Stable content fingerprint, logged on every reload.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        hex::encode(&digest[..8])
    }

    pub fn restrictions(&self, resource_id: &str) -> Option<&ResourceRestrictions> {
        self.resources.get(resource_id)
    }
}

/// Whether an id matches an allow/deny list entry set.
pub(crate) fn list_matches(list: &[String], id: &str) -> bool {
    list.iter().any(|entry| entry == "*" || entry == id)
}

/// External policy source, consulted first on every reload.
#[async_trait]
pub trait PolicyProvider: Send + Sync {
    /// Return the policy document text, or `None` when this provider has
    /// nothing (the chain then falls through to the local file).
    async fn fetch(&self) -> Result<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        default = "deny"
        global_rate_limit_per_hour = 1000

        [roles.analyst]
        allow_agents = ["A1", "A2"]
        deny_agents = ["A_restricted"]
        allow_tools = ["db_query"]

        [roles.admin]
        allow_agents = ["*"]
        allow_tools = ["*"]

        [resources.A1]
        max_execution_time_ms = 5000
        rate_limit_per_hour = 2

        [resources.db_query]
        allowed_parameters = ["table", "filter"]
        forbidden_parameters = ["raw_sql"]
    "#;

    #[test]
    fn parses_sample_document() {
        let doc = PolicyDocument::from_toml(SAMPLE).unwrap();
        assert_eq!(doc.default, PolicyDefault::Deny);
        assert_eq!(doc.global_rate_limit_per_hour, Some(1000));
        assert_eq!(doc.roles.len(), 2);
        assert_eq!(
            doc.restrictions("A1").unwrap().max_execution_time_ms,
            Some(5000)
        );
        assert_eq!(
            doc.restrictions("db_query").unwrap().forbidden_parameters,
            vec!["raw_sql"]
        );
    }

    #[test]
    fn rejects_malformed_document() {
        let err = PolicyDocument::from_toml("default = 42").unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }

    #[test]
    fn wildcard_matches_everything() {
        assert!(list_matches(&["*".into()], "anything"));
        assert!(list_matches(&["A1".into()], "A1"));
        assert!(!list_matches(&["A1".into()], "A2"));
        assert!(!list_matches(&[], "A1"));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = PolicyDocument::from_toml(SAMPLE).unwrap();
        let b = PolicyDocument::from_toml(SAMPLE).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = PolicyDocument::from_toml("default = \"allow\"").unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn empty_document_defaults_to_deny() {
        let doc = PolicyDocument::from_toml("").unwrap();
        assert_eq!(doc.default, PolicyDefault::Deny);
        assert!(doc.roles.is_empty());
    }
}
