mod agent_client;
mod auth;
mod policy;
mod registry;
mod scheduler;
mod server;
mod session;
mod tools;

pub use agent_client::*;
pub use auth::*;
pub use policy::*;
pub use registry::*;
pub use scheduler::*;
pub use server::*;
pub use session::*;
pub use tools::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub agent_client: AgentClientConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Config {
    /// Load a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        fn error(issues: &mut Vec<ConfigIssue>, field: &str, message: String) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message,
            });
        }

        let mut issues = Vec::new();

        if self.server.port == 0 {
            error(&mut issues, "server.port", "port must be greater than 0".into());
        }
        if self.server.host.is_empty() {
            error(&mut issues, "server.host", "host must not be empty".into());
        }
        if self.session.ttl_seconds == 0 {
            error(
                &mut issues,
                "session.ttl_seconds",
                "session TTL must be greater than 0".into(),
            );
        }
        if self.session.event_queue_capacity == 0 {
            error(
                &mut issues,
                "session.event_queue_capacity",
                "event queue capacity must be greater than 0".into(),
            );
        }
        if self.scheduler.parallel_max_in_flight == 0 {
            error(
                &mut issues,
                "scheduler.parallel_max_in_flight",
                "per-request in-flight bound must be greater than 0".into(),
            );
        }
        if self.scheduler.process_max_in_flight == 0 {
            error(
                &mut issues,
                "scheduler.process_max_in_flight",
                "process-wide in-flight bound must be greater than 0".into(),
            );
        }
        if self.agent_client.backoff_base_ms > self.agent_client.backoff_cap_ms {
            error(
                &mut issues,
                "agent_client.backoff_base_ms",
                format!(
                    "backoff base ({} ms) exceeds cap ({} ms)",
                    self.agent_client.backoff_base_ms, self.agent_client.backoff_cap_ms
                ),
            );
        }
        if self.registry.heartbeat_timeout_seconds == 0 {
            error(
                &mut issues,
                "registry.heartbeat_timeout_seconds",
                "heartbeat timeout must be greater than 0".into(),
            );
        }

        // Warn when per-request parallelism exceeds the process-wide bound:
        // a single request could starve every other session.
        if self.scheduler.parallel_max_in_flight > self.scheduler.process_max_in_flight {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "scheduler.parallel_max_in_flight".into(),
                message: format!(
                    "per-request bound ({}) exceeds process-wide bound ({})",
                    self.scheduler.parallel_max_in_flight, self.scheduler.process_max_in_flight
                ),
            });
        }

        // Seed agent entries must be complete and unique.
        let mut seen_ids: HashSet<&str> = HashSet::new();
        for (i, seed) in self.registry.seed.iter().enumerate() {
            if seed.id.is_empty() {
                error(
                    &mut issues,
                    &format!("registry.seed[{i}].id"),
                    "agent id must not be empty".into(),
                );
            }
            if seed.endpoint.is_empty() {
                error(
                    &mut issues,
                    &format!("registry.seed[{i}].endpoint"),
                    "agent endpoint must not be empty".into(),
                );
            }
            if !seed.id.is_empty() && !seen_ids.insert(&seed.id) {
                error(
                    &mut issues,
                    &format!("registry.seed[{i}].id"),
                    format!("duplicate seed agent id \"{}\"", seed.id),
                );
            }
        }

        // Token digests must be 64 hex chars (SHA-256).
        for (i, token) in self.auth.tokens.iter().enumerate() {
            let valid = token.sha256.len() == 64
                && token.sha256.chars().all(|c| c.is_ascii_hexdigit());
            if !valid {
                error(
                    &mut issues,
                    &format!("auth.tokens[{i}].sha256"),
                    "token digest must be a 64-character hex SHA-256".into(),
                );
            }
            if token.role.is_empty() {
                error(
                    &mut issues,
                    &format!("auth.tokens[{i}].role"),
                    "token role must not be empty".into(),
                );
            }
        }

        if self.auth.tokens.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "auth.tokens".into(),
                message: "no API tokens configured — client endpoints run unauthenticated".into(),
            });
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn find_issue<'a>(issues: &'a [ConfigIssue], field_prefix: &str) -> Option<&'a ConfigIssue> {
        issues.iter().find(|e| e.field.starts_with(field_prefix))
    }

    #[test]
    fn default_config_has_no_errors() {
        let issues = Config::default().validate();
        let errors: Vec<_> = issues
            .iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn defaults_match_recognized_options() {
        let cfg = Config::default();
        assert_eq!(cfg.session.ttl_seconds, 3600);
        assert_eq!(cfg.session.idle_timeout_seconds, 1800);
        assert_eq!(cfg.session.event_queue_capacity, 256);
        assert_eq!(cfg.scheduler.parallel_max_in_flight, 16);
        assert_eq!(cfg.scheduler.process_max_in_flight, 256);
        assert_eq!(cfg.scheduler.default_timeout_seconds, 60);
        assert_eq!(cfg.agent_client.max_retries, 3);
        assert_eq!(cfg.agent_client.backoff_base_ms, 250);
        assert_eq!(cfg.agent_client.backoff_cap_ms, 4000);
        assert_eq!(cfg.registry.heartbeat_timeout_seconds, 30);
        assert_eq!(cfg.policy.default, PolicyDefault::Deny);
        assert!(cfg.policy.reload_on_signal);
    }

    #[test]
    fn port_zero_is_error() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "server.port").expect("expected server.port error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn backoff_base_above_cap_is_error() {
        let mut cfg = Config::default();
        cfg.agent_client.backoff_base_ms = 10_000;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "agent_client.backoff_base_ms").is_some());
    }

    #[test]
    fn per_request_bound_above_process_bound_is_warning() {
        let mut cfg = Config::default();
        cfg.scheduler.parallel_max_in_flight = 512;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "scheduler.parallel_max_in_flight")
            .expect("expected parallelism warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn duplicate_seed_ids_is_error() {
        let mut cfg = Config::default();
        cfg.registry.seed = vec![
            AgentSeed {
                id: "a1".into(),
                name: "first".into(),
                capabilities: vec!["search".into()],
                endpoint: "http://localhost:9001".into(),
                max_capacity: 4,
            },
            AgentSeed {
                id: "a1".into(),
                name: "second".into(),
                capabilities: vec![],
                endpoint: "http://localhost:9002".into(),
                max_capacity: 4,
            },
        ];
        let issues = cfg.validate();
        let issue = find_issue(&issues, "registry.seed[1].id").expect("expected duplicate error");
        assert!(issue.message.contains("duplicate"));
    }

    #[test]
    fn bad_token_digest_is_error() {
        let mut cfg = Config::default();
        cfg.auth.tokens = vec![ApiTokenEntry {
            role: "user".into(),
            user: None,
            sha256: "not-hex".into(),
        }];
        let issues = cfg.validate();
        assert!(find_issue(&issues, "auth.tokens[0].sha256").is_some());
    }

    #[test]
    fn no_tokens_is_warning() {
        let issues = Config::default().validate();
        let issue = find_issue(&issues, "auth.tokens").expect("expected auth warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: Config = toml::from_str(
            r#"
            [server]
            port = 8088

            [session]
            ttl_seconds = 120

            [scheduler]
            parallel_max_in_flight = 4
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 8088);
        assert_eq!(cfg.session.ttl_seconds, 120);
        assert_eq!(cfg.scheduler.parallel_max_in_flight, 4);
        // untouched sections keep defaults
        assert_eq!(cfg.agent_client.max_retries, 3);
    }

    #[test]
    fn issue_display_format() {
        let issue = ConfigIssue {
            severity: ConfigSeverity::Error,
            field: "server.port".into(),
            message: "port must be greater than 0".into(),
        };
        assert_eq!(format!("{issue}"), "[ERROR] server.port: port must be greater than 0");
    }
}
