//! Selection strategies over eligible agents.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{AgentHealth, AgentSnapshot};

/// How agents are picked from the eligible set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Minimum load first; ties broken by most-recent heartbeat, then by
    /// stable id order. Healthy agents are preferred over degraded ones.
    LeastLoaded,
    /// Rotate through healthy agents, one step per selection, with a
    /// cursor per requirement set.
    RoundRobin,
    /// The caller supplied explicit agent ids; they must still be
    /// reachable. Order is preserved; missing agents are omitted.
    Pinned(Vec<String>),
}

fn health_rank(health: AgentHealth) -> u8 {
    match health {
        AgentHealth::Healthy => 0,
        AgentHealth::Degraded => 1,
        AgentHealth::Unreachable => 2,
    }
}

pub(crate) fn apply(
    strategy: &SelectionStrategy,
    requirements: &[String],
    mut eligible: Vec<AgentSnapshot>,
    cursors: &Mutex<HashMap<String, usize>>,
    lookup: impl Fn(&str) -> Option<AgentSnapshot>,
) -> Vec<AgentSnapshot> {
    match strategy {
        SelectionStrategy::LeastLoaded => {
            eligible.sort_by(|a, b| {
                health_rank(a.health)
                    .cmp(&health_rank(b.health))
                    .then(a.load.cmp(&b.load))
                    .then(b.last_heartbeat.cmp(&a.last_heartbeat))
                    .then(a.id.cmp(&b.id))
            });
            eligible
        }
        SelectionStrategy::RoundRobin => {
            // Round-robin considers only healthy agents.
            let healthy: Vec<AgentSnapshot> = eligible
                .into_iter()
                .filter(|a| a.health == AgentHealth::Healthy)
                .collect();
            if healthy.is_empty() {
                return healthy;
            }

            let key = {
                let mut reqs: Vec<&str> = requirements.iter().map(String::as_str).collect();
                reqs.sort_unstable();
                reqs.join("+")
            };
            let offset = {
                let mut cursors = cursors.lock();
                let cursor = cursors.entry(key).or_insert(0);
                let offset = *cursor % healthy.len();
                *cursor = cursor.wrapping_add(1);
                offset
            };

            let mut rotated = healthy;
            rotated.rotate_left(offset);
            rotated
        }
        SelectionStrategy::Pinned(ids) => ids
            .iter()
            .filter_map(|id| lookup(id))
            .filter(|a| {
                a.health != AgentHealth::Unreachable
                    && requirements.iter().all(|r| a.capabilities.contains(r))
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AgentRegistry;
    use am_domain::config::RegistryConfig;
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::Value;
    use std::collections::BTreeSet;

    fn record(id: &str, caps: &[&str], load: u32) -> crate::AgentRecord {
        crate::AgentRecord {
            id: id.into(),
            name: format!("{id}-name"),
            capabilities: caps.iter().map(|c| c.to_string()).collect::<BTreeSet<_>>(),
            endpoint: format!("http://localhost:9000/{id}"),
            load,
            max_capacity: 4,
            last_heartbeat: Utc::now(),
            reported_status: None,
            metadata: Value::Null,
        }
    }

    fn registry_with(records: Vec<crate::AgentRecord>) -> AgentRegistry {
        let reg = AgentRegistry::new(&RegistryConfig::default());
        for r in records {
            reg.register(r).unwrap();
        }
        reg
    }

    #[test]
    fn least_loaded_picks_minimum_load() {
        let reg = registry_with(vec![
            record("busy", &["search"], 3),
            record("idle", &["search"], 0),
            record("mid", &["search"], 1),
        ]);
        let picked = reg.select(&["search".into()], &SelectionStrategy::LeastLoaded);
        assert_eq!(picked[0].id, "idle");
        assert_eq!(picked[1].id, "mid");
        assert_eq!(picked[2].id, "busy");
    }

    #[test]
    fn least_loaded_tie_breaks_by_heartbeat_then_id() {
        let reg = registry_with(vec![record("b", &["search"], 1)]);
        // Same load, older heartbeat.
        let mut older = record("a", &["search"], 1);
        older.last_heartbeat = Utc::now() - ChronoDuration::seconds(5);
        reg.register(older).unwrap();

        let picked = reg.select(&["search".into()], &SelectionStrategy::LeastLoaded);
        // "b" has the fresher heartbeat and wins despite later id order.
        assert_eq!(picked[0].id, "b");
    }

    #[test]
    fn least_loaded_prefers_healthy_over_degraded() {
        let reg = registry_with(vec![]);
        // Degraded (load == capacity) vs healthy with some load.
        let degraded = record("degraded", &["search"], 4);
        reg.register(degraded).unwrap();
        reg.register(record("healthy", &["search"], 2)).unwrap();

        let picked = reg.select(&["search".into()], &SelectionStrategy::LeastLoaded);
        assert_eq!(picked[0].id, "healthy");
    }

    #[test]
    fn round_robin_rotates_per_requirement_set() {
        let reg = registry_with(vec![
            record("a", &["search"], 0),
            record("b", &["search"], 0),
            record("c", &["search"], 0),
        ]);
        let reqs = vec!["search".to_string()];

        let first = reg.select(&reqs, &SelectionStrategy::RoundRobin);
        let second = reg.select(&reqs, &SelectionStrategy::RoundRobin);
        let third = reg.select(&reqs, &SelectionStrategy::RoundRobin);
        let fourth = reg.select(&reqs, &SelectionStrategy::RoundRobin);

        assert_eq!(first[0].id, "a");
        assert_eq!(second[0].id, "b");
        assert_eq!(third[0].id, "c");
        assert_eq!(fourth[0].id, "a"); // wrapped
    }

    #[test]
    fn round_robin_skips_non_healthy() {
        let reg = registry_with(vec![record("a", &["search"], 0)]);
        reg.register(record("b", &["search"], 4)).unwrap(); // load == capacity

        for _ in 0..3 {
            let picked = reg.select(&["search".into()], &SelectionStrategy::RoundRobin);
            assert!(picked.iter().all(|a| a.id == "a"));
        }
    }

    #[test]
    fn pinned_preserves_order_and_drops_unreachable() {
        let reg = registry_with(vec![
            record("a1", &["search"], 0),
            record("a2", &["search"], 0),
        ]);
        let mut stale = record("a3", &["search"], 0);
        stale.last_heartbeat = Utc::now() - ChronoDuration::seconds(120);
        reg.register(stale).unwrap();

        let picked = reg.select(
            &[],
            &SelectionStrategy::Pinned(vec!["a2".into(), "a3".into(), "a1".into()]),
        );
        let ids: Vec<&str> = picked.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a2", "a1"]);
    }

    #[test]
    fn pinned_accepts_degraded_agents() {
        let reg = registry_with(vec![]);
        reg.register(record("a1", &[], 4)).unwrap(); // load == capacity

        let picked = reg.select(&[], &SelectionStrategy::Pinned(vec!["a1".into()]));
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].health, AgentHealth::Degraded);
    }

    #[test]
    fn strategy_serde_shapes() {
        let json = serde_json::to_value(SelectionStrategy::LeastLoaded).unwrap();
        assert_eq!(json, "least_loaded");
        let pinned: SelectionStrategy =
            serde_json::from_value(serde_json::json!({ "pinned": ["a1"] })).unwrap();
        assert_eq!(pinned, SelectionStrategy::Pinned(vec!["a1".into()]));
    }
}
