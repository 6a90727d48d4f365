//! Discovery (§4.6): an agent declares an interesting fact. Delivered
//! fleet-wide as a [`Broadcast`] and additionally persisted as a
//! memory so the insight is searchable after the fact, rather than
//! living only in the ephemeral bus.
use std::collections::HashSet;

use crate::identity::MachineId;
use crate::types::{Broadcast, Category, Severity};

use super::broadcast::new_broadcast;

/// A fact worth telling the fleet about now *and* keeping around for
/// later semantic search.
pub struct Discovery {
    pub broadcast: Broadcast,
    pub category: Category,
    pub tags: HashSet<String>,
}

pub fn new_discovery(machine_id: &MachineId, agent_id: String, category: Category, message: String) -> Discovery {
    let mut tags = HashSet::new();
    tags.insert("discovery".to_string());
    Discovery {
        broadcast: new_broadcast(machine_id, agent_id, category, Severity::Info, message),
        category,
        tags,
    }
}
