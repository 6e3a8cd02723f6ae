//! Plans: which agents run, in what arrangement.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use am_domain::config::SchedulerConfig;
use am_domain::error::{Error, Result};

use crate::condition::Condition;

/// Fallback iteration budget when a loop override names no
/// `max_iterations`.
const DEFAULT_LOOP_ITERATIONS: u32 = 3;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Patterns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The shape in which selected agents are invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pattern {
    Simple,
    Sequential,
    Parallel {
        timeout_seconds: u64,
        fail_fast: bool,
    },
    Loop {
        max_iterations: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
        inner: Box<Pattern>,
    },
}

impl Pattern {
    pub fn name(&self) -> &'static str {
        match self {
            Pattern::Simple => "simple",
            Pattern::Sequential => "sequential",
            Pattern::Parallel { .. } => "parallel",
            Pattern::Loop { .. } => "loop",
        }
    }

    /// Every pattern name a caller may request.
    pub fn known_names() -> &'static [&'static str] {
        &["simple", "sequential", "parallel", "loop"]
    }
}

/// A validated execution plan.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub pattern: Pattern,
    pub agents: Vec<String>,
    pub user_override: bool,
    /// Sequential steps whose failure does not halt the chain.
    #[serde(skip_serializing_if = "HashSet::is_empty")]
    pub optional_agents: HashSet<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request context (user overrides)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Caller-supplied context accompanying a message. Any orchestration
/// field present makes the plan a user override.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub orchestration_pattern: Option<String>,
    /// Unordered agent set (parallel/simple).
    #[serde(default)]
    pub agents: Option<Vec<String>>,
    /// Ordered agent chain (sequential/loop).
    #[serde(default)]
    pub agent_sequence: Option<Vec<String>>,
    #[serde(default)]
    pub parallel_config: Option<ParallelOverride>,
    #[serde(default)]
    pub loop_config: Option<LoopOverride>,
    /// Whole-request deadline override.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Sequential steps that may fail without halting the chain.
    #[serde(default)]
    pub optional_agents: Vec<String>,
    /// Opaque parameters forwarded to every invoked agent.
    #[serde(default)]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParallelOverride {
    /// Wall-clock budget for the whole fan-out, in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub fail_fast: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoopOverride {
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub condition: Option<String>,
}

impl RequestContext {
    /// Whether the caller pinned any part of the plan.
    pub fn has_overrides(&self) -> bool {
        self.orchestration_pattern.is_some()
            || self.agents.is_some()
            || self.agent_sequence.is_some()
    }

    /// The agent list implied by the overrides: an explicit sequence wins
    /// over an unordered set.
    pub fn override_agents(&self) -> Option<&[String]> {
        self.agent_sequence
            .as_deref()
            .or(self.agents.as_deref())
    }

    /// Build the overridden plan. Fails on unknown pattern names, empty
    /// agent lists, and unparseable loop conditions.
    pub fn build_override_plan(&self, cfg: &SchedulerConfig) -> Result<Plan> {
        let agents: Vec<String> = self
            .override_agents()
            .map(<[String]>::to_vec)
            .unwrap_or_default();

        let pattern_name = match &self.orchestration_pattern {
            Some(name) => name.as_str(),
            // Pattern inferred from the shape of the agent override.
            None if self.agent_sequence.is_some() => "sequential",
            None if agents.len() > 1 => "parallel",
            None => "simple",
        };

        if agents.is_empty() {
            return Err(Error::InvalidRequest(
                "orchestration override supplies no agents".into(),
            ));
        }

        let pattern = match pattern_name {
            "simple" => Pattern::Simple,
            "sequential" => Pattern::Sequential,
            "parallel" => {
                let overrides = self.parallel_config.as_ref();
                Pattern::Parallel {
                    timeout_seconds: overrides
                        .and_then(|p| p.timeout)
                        .unwrap_or(cfg.default_timeout_seconds),
                    fail_fast: overrides.and_then(|p| p.fail_fast).unwrap_or(false),
                }
            }
            "loop" => {
                let overrides = self.loop_config.as_ref();
                let condition = overrides.and_then(|l| l.condition.clone());
                if let Some(raw) = &condition {
                    // Surface malformed conditions at plan time, not on
                    // iteration three.
                    Condition::parse(raw)?;
                }
                let inner = if agents.len() > 1 && self.agent_sequence.is_none() {
                    Pattern::Parallel {
                        timeout_seconds: cfg.default_timeout_seconds,
                        fail_fast: false,
                    }
                } else {
                    Pattern::Sequential
                };
                Pattern::Loop {
                    max_iterations: overrides
                        .and_then(|l| l.max_iterations)
                        .unwrap_or(DEFAULT_LOOP_ITERATIONS),
                    condition,
                    inner: Box::new(inner),
                }
            }
            other => {
                return Err(Error::InvalidRequest(format!(
                    "unknown orchestration pattern \"{other}\" (expected one of {:?})",
                    Pattern::known_names()
                )))
            }
        };

        Ok(Plan {
            pattern,
            agents,
            user_override: true,
            optional_agents: self.optional_agents.iter().cloned().collect(),
        })
    }
}
