//! In-memory registry of live specialized agents and their capabilities.
//!
//! Records are owned by the registry and updated only on heartbeat or
//! deregistration. Health is derived at query time, never stored: a fresh
//! heartbeat with spare capacity is `healthy`, a fresh heartbeat at or over
//! capacity is `degraded`, a stale heartbeat is `unreachable`. Unreachable
//! agents are never returned by selection.

pub mod select;

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use am_domain::config::RegistryConfig;
use am_domain::error::{Error, Result};
use am_domain::telemetry::TraceEvent;

pub use select::SelectionStrategy;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Status an agent may self-report on heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Healthy,
    Degraded,
}

/// Derived health of an agent at query time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentHealth {
    Healthy,
    Degraded,
    Unreachable,
}

/// A registered agent. Uniqueness key is `id`; `name` must not be bound to
/// a different id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    pub endpoint: String,
    #[serde(default)]
    pub load: u32,
    pub max_capacity: u32,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_status: Option<ReportedStatus>,
    #[serde(default)]
    pub metadata: Value,
}

/// Read-model of an agent with its derived health.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub name: String,
    pub capabilities: BTreeSet<String>,
    pub endpoint: String,
    pub load: u32,
    pub max_capacity: u32,
    pub last_heartbeat: DateTime<Utc>,
    pub health: AgentHealth,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Thread-safe agent registry. Readers see snapshots; writers are
/// serialized by the lock and never held across await points.
pub struct AgentRegistry {
    heartbeat_timeout: ChronoDuration,
    agents: RwLock<HashMap<String, AgentRecord>>,
    /// Round-robin cursors keyed by the sorted requirement set.
    cursors: Mutex<HashMap<String, usize>>,
}

impl AgentRegistry {
    pub fn new(cfg: &RegistryConfig) -> Self {
        Self {
            heartbeat_timeout: ChronoDuration::seconds(cfg.heartbeat_timeout_seconds as i64),
            agents: RwLock::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Register or update an agent. Rejects a name already bound to a
    /// different id.
    pub fn register(&self, record: AgentRecord) -> Result<()> {
        let mut agents = self.agents.write();
        let conflict = agents
            .values()
            .any(|a| a.name == record.name && a.id != record.id);
        if conflict {
            return Err(Error::InvalidRequest(format!(
                "agent name \"{}\" is already bound to a different id",
                record.name
            )));
        }

        TraceEvent::AgentRegistered {
            agent_id: record.id.clone(),
            capabilities: record.capabilities.len(),
        }
        .emit();
        agents.insert(record.id.clone(), record);
        Ok(())
    }

    /// Record a heartbeat: refresh the timestamp and load, optionally the
    /// self-reported status.
    pub fn heartbeat(&self, id: &str, load: u32, status: Option<ReportedStatus>) -> Result<()> {
        let mut agents = self.agents.write();
        let record = agents
            .get_mut(id)
            .ok_or_else(|| Error::InvalidRequest(format!("unknown agent id \"{id}\"")))?;
        record.last_heartbeat = Utc::now();
        record.load = load;
        if let Some(status) = status {
            record.reported_status = Some(status);
        }
        Ok(())
    }

    /// Graceful removal. Returns whether the agent was present.
    pub fn deregister(&self, id: &str) -> bool {
        let removed = self.agents.write().remove(id).is_some();
        if removed {
            TraceEvent::AgentDeregistered {
                agent_id: id.to_owned(),
            }
            .emit();
        }
        removed
    }

    fn health_of(&self, record: &AgentRecord, now: DateTime<Utc>) -> AgentHealth {
        if now - record.last_heartbeat > self.heartbeat_timeout {
            return AgentHealth::Unreachable;
        }
        if record.load >= record.max_capacity
            || record.reported_status == Some(ReportedStatus::Degraded)
        {
            return AgentHealth::Degraded;
        }
        AgentHealth::Healthy
    }

    fn snapshot_of(&self, record: &AgentRecord, now: DateTime<Utc>) -> AgentSnapshot {
        AgentSnapshot {
            id: record.id.clone(),
            name: record.name.clone(),
            capabilities: record.capabilities.clone(),
            endpoint: record.endpoint.clone(),
            load: record.load,
            max_capacity: record.max_capacity,
            last_heartbeat: record.last_heartbeat,
            health: self.health_of(record, now),
        }
    }

    /// Snapshot of all records, optionally filtered by one capability.
    pub fn list_all(&self, capability: Option<&str>) -> Vec<AgentSnapshot> {
        let now = Utc::now();
        let mut out: Vec<AgentSnapshot> = self
            .agents
            .read()
            .values()
            .filter(|a| capability.map_or(true, |c| a.capabilities.contains(c)))
            .map(|a| self.snapshot_of(a, now))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Snapshot of agents that are currently reachable, for planning.
    pub fn available(&self) -> Vec<AgentSnapshot> {
        let mut out: Vec<AgentSnapshot> = self
            .list_all(None)
            .into_iter()
            .filter(|a| a.health != AgentHealth::Unreachable)
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Look up one agent by id.
    pub fn get(&self, id: &str) -> Option<AgentSnapshot> {
        let now = Utc::now();
        self.agents.read().get(id).map(|a| self.snapshot_of(a, now))
    }

    /// Remove records whose heartbeat is older than three timeouts. They
    /// have been unreachable (and unselectable) for the whole interval.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = self.heartbeat_timeout * 3;
        let mut agents = self.agents.write();
        let before = agents.len();
        agents.retain(|_, a| now - a.last_heartbeat <= cutoff);
        let pruned = before - agents.len();
        if pruned > 0 {
            TraceEvent::RegistryPruned {
                pruned,
                remaining: agents.len(),
            }
            .emit();
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    /// Agents eligible for a requirement set: reachable, and their
    /// capability set covers every requirement.
    fn eligible(&self, requirements: &[String]) -> Vec<AgentSnapshot> {
        let now = Utc::now();
        let mut out: Vec<AgentSnapshot> = self
            .agents
            .read()
            .values()
            .filter(|a| requirements.iter().all(|r| a.capabilities.contains(r)))
            .map(|a| self.snapshot_of(a, now))
            .filter(|s| s.health != AgentHealth::Unreachable)
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Select agents covering `requirements` under the given strategy.
    /// Returns an empty vec when nothing matches — the caller decides
    /// whether that is `NoEligibleAgent`.
    pub fn select(
        &self,
        requirements: &[String],
        strategy: &SelectionStrategy,
    ) -> Vec<AgentSnapshot> {
        let eligible = self.eligible(requirements);
        select::apply(strategy, requirements, eligible, &self.cursors, |id| {
            self.get(id)
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn make_record(id: &str, caps: &[&str]) -> AgentRecord {
        AgentRecord {
            id: id.into(),
            name: format!("{id}-name"),
            capabilities: caps.iter().map(|c| c.to_string()).collect(),
            endpoint: format!("http://localhost:9000/{id}"),
            load: 0,
            max_capacity: 4,
            last_heartbeat: Utc::now(),
            reported_status: None,
            metadata: Value::Null,
        }
    }

    fn make_registry() -> AgentRegistry {
        AgentRegistry::new(&RegistryConfig::default())
    }

    #[test]
    fn register_and_list() {
        let reg = make_registry();
        reg.register(make_record("a1", &["search"])).unwrap();
        reg.register(make_record("a2", &["search", "summarize"])).unwrap();

        assert_eq!(reg.list_all(None).len(), 2);
        assert_eq!(reg.list_all(Some("summarize")).len(), 1);
        assert_eq!(reg.list_all(Some("unknown")).len(), 0);
    }

    #[test]
    fn register_upserts_by_id() {
        let reg = make_registry();
        reg.register(make_record("a1", &["search"])).unwrap();
        let mut updated = make_record("a1", &["search", "analyze"]);
        updated.max_capacity = 16;
        reg.register(updated).unwrap();

        assert_eq!(reg.len(), 1);
        let snap = reg.get("a1").unwrap();
        assert_eq!(snap.capabilities.len(), 2);
        assert_eq!(snap.max_capacity, 16);
    }

    #[test]
    fn register_rejects_name_bound_to_other_id() {
        let reg = make_registry();
        reg.register(make_record("a1", &[])).unwrap();
        let mut clash = make_record("a2", &[]);
        clash.name = "a1-name".into();
        let err = reg.register(clash).unwrap_err();
        assert_eq!(err.kind(), "InvalidRequest");
    }

    #[test]
    fn heartbeat_updates_load_and_status() {
        let reg = make_registry();
        reg.register(make_record("a1", &[])).unwrap();
        reg.heartbeat("a1", 3, Some(ReportedStatus::Degraded)).unwrap();

        let snap = reg.get("a1").unwrap();
        assert_eq!(snap.load, 3);
        assert_eq!(snap.health, AgentHealth::Degraded);
    }

    #[test]
    fn heartbeat_unknown_agent_fails() {
        let reg = make_registry();
        assert!(reg.heartbeat("ghost", 0, None).is_err());
    }

    #[test]
    fn health_is_derived_from_load_and_staleness() {
        let reg = make_registry();
        reg.register(make_record("fresh", &[])).unwrap();

        let mut loaded = make_record("loaded", &[]);
        loaded.load = 4; // == max_capacity
        reg.register(loaded).unwrap();

        let mut stale = make_record("stale", &[]);
        stale.last_heartbeat = Utc::now() - ChronoDuration::seconds(120);
        reg.register(stale).unwrap();

        assert_eq!(reg.get("fresh").unwrap().health, AgentHealth::Healthy);
        assert_eq!(reg.get("loaded").unwrap().health, AgentHealth::Degraded);
        assert_eq!(reg.get("stale").unwrap().health, AgentHealth::Unreachable);
    }

    #[test]
    fn selection_never_returns_stale_agents() {
        let reg = make_registry();
        let mut stale = make_record("stale", &["search"]);
        stale.last_heartbeat = Utc::now() - ChronoDuration::seconds(120);
        reg.register(stale).unwrap();

        let picked = reg.select(&["search".into()], &SelectionStrategy::LeastLoaded);
        assert!(picked.is_empty());
        assert!(reg.available().is_empty());
    }

    #[test]
    fn capability_matching_requires_superset() {
        let reg = make_registry();
        reg.register(make_record("a1", &["search"])).unwrap();
        reg.register(make_record("a2", &["search", "analyze"])).unwrap();

        let both = vec!["search".into(), "analyze".into()];
        let picked = reg.select(&both, &SelectionStrategy::LeastLoaded);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, "a2");
    }

    #[test]
    fn deregister_removes() {
        let reg = make_registry();
        reg.register(make_record("a1", &[])).unwrap();
        assert!(reg.deregister("a1"));
        assert!(!reg.deregister("a1"));
        assert!(reg.is_empty());
    }

    #[test]
    fn prune_drops_long_stale_records() {
        let reg = make_registry();
        reg.register(make_record("fresh", &[])).unwrap();
        let mut old = make_record("old", &[]);
        // Past 3 × heartbeat_timeout (default 30s).
        old.last_heartbeat = Utc::now() - ChronoDuration::seconds(120);
        reg.register(old).unwrap();

        let pruned = reg.prune(Utc::now());
        assert_eq!(pruned, 1);
        assert!(reg.get("old").is_none());
        assert!(reg.get("fresh").is_some());
    }
}
