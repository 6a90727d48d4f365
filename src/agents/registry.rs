//! Agent Registry (§4.5): who is registered, on which machine, with
//! what capabilities, and whether their lease is still current.
use std::collections::HashSet;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::error::{CollectiveError, CollectiveResult};
use crate::identity::MachineId;
use crate::types::{Agent, AgentStatus};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Optional filter applied to [`AgentRegistry::roster`].
#[derive(Debug, Clone, Default)]
pub struct RosterFilter {
    pub machine_id: Option<MachineId>,
    pub capability: Option<String>,
    pub status: Option<AgentStatus>,
}

/// Local view of the fleet's agents. Entries for remote machines arrive
/// via the Coordination Bus and are merged in through
/// [`AgentRegistry::merge_remote`]; this type itself holds no network
/// code.
pub struct AgentRegistry {
    machine_id: MachineId,
    lease: Duration,
    agents: DashMap<String, Agent>,
}

impl AgentRegistry {
    pub fn new(machine_id: MachineId, lease: Duration) -> Self {
        Self {
            machine_id,
            lease,
            agents: DashMap::new(),
        }
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Register a new agent on this machine, returning its generated id.
    pub fn register(&self, role: impl Into<String>, capabilities: HashSet<String>) -> String {
        let agent_id = format!("{}:{}", self.machine_id.as_str(), ulid::Ulid::new());
        let now = now_ms();
        let agent = Agent {
            agent_id: agent_id.clone(),
            machine_id: self.machine_id.clone(),
            role: role.into(),
            capabilities,
            last_seen: now,
            status: AgentStatus::Idle,
            lease_expires_at: now + self.lease.as_millis() as i64,
        };
        info!(agent_id = %agent_id, role = %agent.role, "agent registered");
        self.agents.insert(agent_id.clone(), agent);
        agent_id
    }

    pub fn deregister(&self, agent_id: &str) -> CollectiveResult<()> {
        self.agents
            .remove(agent_id)
            .map(|_| ())
            .ok_or_else(|| CollectiveError::not_found("agent", agent_id))
    }

    /// Renew an agent's lease and update its reported status.
    pub fn heartbeat(&self, agent_id: &str, status: AgentStatus) -> CollectiveResult<()> {
        let mut entry = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| CollectiveError::not_found("agent", agent_id))?;
        let now = now_ms();
        entry.last_seen = now;
        entry.status = status;
        entry.lease_expires_at = now + self.lease.as_millis() as i64;
        Ok(())
    }

    /// Merge in an agent record learned about a peer machine via C.
    /// Last-writer-wins on `last_seen`, since agent records have no
    /// Lamport version of their own.
    pub fn merge_remote(&self, agent: Agent) {
        match self.agents.get(&agent.agent_id) {
            Some(existing) if existing.last_seen >= agent.last_seen => {}
            _ => {
                self.agents.insert(agent.agent_id.clone(), agent);
            }
        }
    }

    pub fn get(&self, agent_id: &str) -> Option<Agent> {
        self.agents.get(agent_id).map(|a| a.clone())
    }

    /// Fleet-wide view (local + merged remote state), optionally filtered.
    pub fn roster(&self, filter: Option<&RosterFilter>) -> Vec<Agent> {
        self.agents
            .iter()
            .map(|e| e.value().clone())
            .filter(|a| match filter {
                None => true,
                Some(f) => {
                    f.machine_id.as_ref().map_or(true, |m| *m == a.machine_id)
                        && f.capability.as_ref().map_or(true, |c| a.capabilities.contains(c))
                        && f.status.map_or(true, |s| s == a.status)
                }
            })
            .collect()
    }

    /// Mark any agent whose lease has expired as offline. Returns the
    /// ids newly marked, so a caller can decide whether to broadcast.
    pub fn expire_leases(&self) -> Vec<String> {
        let now = now_ms();
        let mut expired = Vec::new();
        for mut entry in self.agents.iter_mut() {
            if entry.status != AgentStatus::Offline && entry.lease_expires_at < now {
                entry.status = AgentStatus::Offline;
                expired.push(entry.agent_id.clone());
            }
        }
        expired
    }

    /// Evict agents that have been offline for longer than `2·lease`.
    /// Returns the evicted ids so the caller can broadcast the eviction
    /// (§4.5: "Evictions are broadcast").
    pub fn evict_stale(&self) -> Vec<String> {
        let now = now_ms();
        let grace = 2 * self.lease.as_millis() as i64;
        let stale: Vec<String> = self
            .agents
            .iter()
            .filter(|e| e.status == AgentStatus::Offline && now - e.lease_expires_at > grace)
            .map(|e| e.agent_id.clone())
            .collect();
        for agent_id in &stale {
            self.agents.remove(agent_id);
            warn!(agent_id = %agent_id, "evicted agent after prolonged offline lease");
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> AgentRegistry {
        AgentRegistry::new(MachineId("m1".into()), Duration::from_millis(50))
    }

    #[test]
    fn register_then_roster_returns_the_agent() {
        let reg = registry();
        let caps: HashSet<String> = ["search".to_string()].into_iter().collect();
        let id = reg.register("worker", caps.clone());
        let roster = reg.roster(None);
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].agent_id, id);
        assert_eq!(roster[0].capabilities, caps);
    }

    #[test]
    fn heartbeat_renews_the_lease() {
        let reg = registry();
        let id = reg.register("worker", HashSet::new());
        let before = reg.get(&id).unwrap().lease_expires_at;
        std::thread::sleep(Duration::from_millis(5));
        reg.heartbeat(&id, AgentStatus::Busy).unwrap();
        let after = reg.get(&id).unwrap().lease_expires_at;
        assert!(after >= before);
        assert_eq!(reg.get(&id).unwrap().status, AgentStatus::Busy);
    }

    #[test]
    fn heartbeat_on_unknown_agent_errors() {
        let reg = registry();
        assert!(reg.heartbeat("nope", AgentStatus::Idle).is_err());
    }

    #[test]
    fn expired_lease_marks_agent_offline() {
        let reg = registry();
        let id = reg.register("worker", HashSet::new());
        std::thread::sleep(Duration::from_millis(60));
        let expired = reg.expire_leases();
        assert_eq!(expired, vec![id.clone()]);
        assert_eq!(reg.get(&id).unwrap().status, AgentStatus::Offline);
    }

    #[test]
    fn offline_agent_is_evicted_after_double_the_lease() {
        let reg = registry();
        let id = reg.register("worker", HashSet::new());
        std::thread::sleep(Duration::from_millis(60));
        reg.expire_leases();
        // Not yet past 2*lease since expiry.
        assert!(reg.evict_stale().is_empty());
        std::thread::sleep(Duration::from_millis(120));
        let evicted = reg.evict_stale();
        assert_eq!(evicted, vec![id.clone()]);
        assert!(reg.get(&id).is_none());
    }

    #[test]
    fn deregister_removes_the_agent() {
        let reg = registry();
        let id = reg.register("worker", HashSet::new());
        reg.deregister(&id).unwrap();
        assert!(reg.get(&id).is_none());
    }
}
