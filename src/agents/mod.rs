//! Agent Registry & Router (A, §4.5): tracks who can do what, where,
//! and picks an agent for a task.
pub mod registry;
pub mod router;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CollectiveResult;
use crate::identity::MachineId;
use crate::types::{Agent, AgentStatus};

pub use registry::{AgentRegistry, RosterFilter};
pub use router::{route, Affinity};

/// Thin facade over [`AgentRegistry`] + [`router::route`] exposing the
/// §4.5 operation names directly.
pub struct AgentDirectory {
    machine_id: MachineId,
    registry: Arc<AgentRegistry>,
}

impl AgentDirectory {
    pub fn new(machine_id: MachineId, lease: Duration) -> Self {
        Self {
            registry: Arc::new(AgentRegistry::new(machine_id.clone(), lease)),
            machine_id,
        }
    }

    pub fn registry(&self) -> Arc<AgentRegistry> {
        self.registry.clone()
    }

    pub fn register(&self, role: impl Into<String>, capabilities: HashSet<String>) -> String {
        self.registry.register(role, capabilities)
    }

    pub fn deregister(&self, agent_id: &str) -> CollectiveResult<()> {
        self.registry.deregister(agent_id)
    }

    pub fn heartbeat(&self, agent_id: &str, status: AgentStatus) -> CollectiveResult<()> {
        self.registry.heartbeat(agent_id, status)
    }

    pub fn roster(&self, filter: Option<&RosterFilter>) -> Vec<Agent> {
        self.registry.roster(filter)
    }

    pub fn route(&self, required_capabilities: &HashSet<String>, affinity: Option<&Affinity>) -> CollectiveResult<String> {
        router::route(&self.registry, &self.machine_id, required_capabilities, affinity)
    }

    /// Sweep expired leases to offline, then evict anyone stale beyond
    /// `2·lease`. Returns `(newly_offline, evicted)` so a caller can
    /// broadcast both (§4.5: "Evictions are broadcast").
    pub fn sweep_leases(&self) -> (Vec<String>, Vec<String>) {
        let newly_offline = self.registry.expire_leases();
        let evicted = self.registry.evict_stale();
        (newly_offline, evicted)
    }
}
