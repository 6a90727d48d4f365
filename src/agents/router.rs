//! Routing (§4.5): pick the best agent for a set of required
//! capabilities, in the spec's fixed preference order.
use std::collections::HashSet;

use crate::error::{CollectiveError, CollectiveResult};
use crate::identity::MachineId;
use crate::types::{Agent, AgentStatus};

use super::registry::AgentRegistry;

/// Optional hint steering selection toward a preferred machine when
/// more than one candidate is equally eligible.
#[derive(Debug, Clone, Default)]
pub struct Affinity {
    pub preferred_machine: Option<MachineId>,
}

/// Select an agent for `required_capabilities`, in preference order:
/// (1) an idle-or-busy agent on `requesting_machine` with every
/// required capability, (2) the idle agent elsewhere with the highest
/// capability match, (3) the least-loaded busy agent, (4) failure.
pub fn route(
    registry: &AgentRegistry,
    requesting_machine: &MachineId,
    required_capabilities: &HashSet<String>,
    affinity: Option<&Affinity>,
) -> CollectiveResult<String> {
    let candidates: Vec<Agent> = registry
        .roster(None)
        .into_iter()
        .filter(|a| a.status != AgentStatus::Offline && a.has_capabilities(required_capabilities))
        .collect();

    if candidates.is_empty() {
        return Err(CollectiveError::not_found("agent", "no agent with required capabilities"));
    }

    // (1) Local machine, any status but offline.
    if let Some(local) = candidates.iter().find(|a| a.machine_id == *requesting_machine) {
        return Ok(local.agent_id.clone());
    }

    // Affinity breaks ties among otherwise-equal candidates before
    // falling through to the generic idle/busy ordering.
    if let Some(pref) = affinity.and_then(|a| a.preferred_machine.as_ref()) {
        if let Some(preferred) = candidates.iter().find(|a| a.machine_id == *pref) {
            return Ok(preferred.agent_id.clone());
        }
    }

    // (2) Idle agent with the highest capability match (most total
    // capabilities, as a proxy for "most capable" beyond the minimum
    // required set).
    let mut idle: Vec<&Agent> = candidates.iter().filter(|a| a.status == AgentStatus::Idle).collect();
    if !idle.is_empty() {
        idle.sort_by_key(|a| std::cmp::Reverse(a.capabilities.len()));
        return Ok(idle[0].agent_id.clone());
    }

    // (3) Least-loaded busy agent. Load isn't tracked on `Agent` today,
    // so all remaining (busy) candidates are treated as equally loaded
    // and the most recently seen one is preferred as the best proxy for
    // "currently responsive".
    let mut busy: Vec<&Agent> = candidates.iter().filter(|a| a.status == AgentStatus::Busy).collect();
    if !busy.is_empty() {
        busy.sort_by_key(|a| std::cmp::Reverse(a.last_seen));
        return Ok(busy[0].agent_id.clone());
    }

    Err(CollectiveError::not_found("agent", "no capable agent is currently reachable"))
}
