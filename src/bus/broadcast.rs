//! Broadcast delivery (§4.6): ephemeral, at-least-once, fleet-wide.
//! Duplicated on partitions; receivers dedup on `id`.
use dashmap::DashSet;

use crate::identity::MachineId;
use crate::types::{Broadcast, Category, Origin, Severity};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn new_broadcast(machine_id: &MachineId, agent_id: String, category: Category, severity: Severity, message: String) -> Broadcast {
    Broadcast {
        id: ulid::Ulid::new().to_string(),
        category,
        severity,
        message,
        origin: Origin {
            machine_id: machine_id.clone(),
            agent_id,
            created_at_wall: now_ms(),
        },
        created_at: now_ms(),
    }
}

/// Tracks broadcast ids already delivered to this machine's consumers,
/// so redelivery on a flaky partition is silently absorbed rather than
/// surfaced twice.
#[derive(Default)]
pub struct BroadcastDedup {
    seen: DashSet<String>,
}

impl BroadcastDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this is the first time `id` has been seen.
    pub fn observe(&self, id: &str) -> bool {
        self.seen.insert(id.to_string())
    }
}
