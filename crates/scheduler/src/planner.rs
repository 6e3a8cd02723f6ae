//! Automatic agent selection.
//!
//! The [`Planner`] trait is the LLM integration point: given the query and
//! the registry's current capability snapshot, produce a pattern and agent
//! set. The bundled [`HeuristicPlanner`] scores capability tags against
//! the query text — it keeps the platform fully functional without an LLM
//! and serves as the fallback shape an LLM-backed implementation refines.

use async_trait::async_trait;

use am_domain::error::Result;
use am_registry::AgentSnapshot;

use crate::plan::Pattern;

/// A proposed (not yet validated) plan.
#[derive(Debug, Clone)]
pub struct PlannerProposal {
    pub pattern: Pattern,
    pub agents: Vec<String>,
}

#[async_trait]
pub trait Planner: Send + Sync {
    /// Propose a plan for `query` over the currently reachable agents.
    /// An empty agent list means no agent fits.
    async fn plan(&self, query: &str, agents: &[AgentSnapshot]) -> Result<PlannerProposal>;
}

/// Keyword scorer over capability tags.
pub struct HeuristicPlanner {
    /// Cap on how many agents an auto-selected parallel plan fans out to.
    max_parallel: usize,
    /// Timeout stamped on auto-selected parallel plans.
    parallel_timeout_seconds: u64,
}

impl HeuristicPlanner {
    pub fn new(max_parallel: usize, parallel_timeout_seconds: u64) -> Self {
        Self {
            max_parallel,
            parallel_timeout_seconds,
        }
    }

    /// Score one agent against the query: 2 per capability appearing
    /// verbatim, 1 per capability sharing a token with the query.
    fn score(query: &str, agent: &AgentSnapshot) -> u32 {
        let query = query.to_lowercase();
        let query_tokens: Vec<&str> = query
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let mut score = 0;
        for capability in &agent.capabilities {
            let capability = capability.to_lowercase();
            if query.contains(&capability) {
                score += 2;
                continue;
            }
            let overlaps = capability
                .split(|c: char| !c.is_ascii_alphanumeric())
                .any(|token| !token.is_empty() && query_tokens.contains(&token));
            if overlaps {
                score += 1;
            }
        }
        score
    }
}

impl Default for HeuristicPlanner {
    fn default() -> Self {
        Self::new(3, 60)
    }
}

#[async_trait]
impl Planner for HeuristicPlanner {
    async fn plan(&self, query: &str, agents: &[AgentSnapshot]) -> Result<PlannerProposal> {
        let mut scored: Vec<(u32, &AgentSnapshot)> = agents
            .iter()
            .map(|a| (Self::score(query, a), a))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.id.cmp(&b.1.id)));

        let agents: Vec<String> = scored
            .iter()
            .take(self.max_parallel)
            .map(|(_, a)| a.id.clone())
            .collect();

        let pattern = match agents.len() {
            0 | 1 => Pattern::Simple,
            _ => Pattern::Parallel {
                timeout_seconds: self.parallel_timeout_seconds,
                fail_fast: false,
            },
        };

        Ok(PlannerProposal { pattern, agents })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use am_registry::AgentHealth;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn snapshot(id: &str, caps: &[&str]) -> AgentSnapshot {
        AgentSnapshot {
            id: id.into(),
            name: format!("{id}-name"),
            capabilities: caps.iter().map(|c| c.to_string()).collect::<BTreeSet<_>>(),
            endpoint: format!("http://localhost:9000/{id}"),
            load: 0,
            max_capacity: 4,
            last_heartbeat: Utc::now(),
            health: AgentHealth::Healthy,
        }
    }

    #[tokio::test]
    async fn single_match_proposes_simple() {
        let agents = vec![snapshot("A1", &["search"]), snapshot("A2", &["translate"])];
        let proposal = HeuristicPlanner::default()
            .plan("find users older than 30 via search", &agents)
            .await
            .unwrap();
        assert_eq!(proposal.pattern, Pattern::Simple);
        assert_eq!(proposal.agents, vec!["A1"]);
    }

    #[tokio::test]
    async fn multiple_matches_propose_parallel() {
        let agents = vec![
            snapshot("A1", &["search"]),
            snapshot("A2", &["search", "analyze"]),
            snapshot("A3", &["translate"]),
        ];
        let proposal = HeuristicPlanner::default()
            .plan("search and analyze the report", &agents)
            .await
            .unwrap();
        assert!(matches!(proposal.pattern, Pattern::Parallel { .. }));
        // A2 scores higher (two matching capabilities).
        assert_eq!(proposal.agents[0], "A2");
        assert!(proposal.agents.contains(&"A1".to_string()));
    }

    #[tokio::test]
    async fn no_match_returns_empty() {
        let agents = vec![snapshot("A1", &["search"])];
        let proposal = HeuristicPlanner::default()
            .plan("compose a haiku", &agents)
            .await
            .unwrap();
        assert!(proposal.agents.is_empty());
    }

    #[tokio::test]
    async fn fan_out_is_capped() {
        let agents: Vec<AgentSnapshot> = (0..10)
            .map(|i| snapshot(&format!("A{i}"), &["search"]))
            .collect();
        let proposal = HeuristicPlanner::new(3, 60)
            .plan("search everything", &agents)
            .await
            .unwrap();
        assert_eq!(proposal.agents.len(), 3);
    }

    #[tokio::test]
    async fn tie_break_is_stable_id_order() {
        let agents = vec![snapshot("B", &["search"]), snapshot("A", &["search"])];
        let proposal = HeuristicPlanner::default()
            .plan("search", &agents)
            .await
            .unwrap();
        assert_eq!(proposal.agents, vec!["A", "B"]);
    }
}
