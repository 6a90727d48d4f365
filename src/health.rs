//! Health / status endpoint (§6): `{machine_id, peer_count,
//! unreachable_peers, memory_count, ring_fill_pct, last_digest_at,
//! lag_per_peer}`. A plain snapshot struct — the out-of-scope
//! transport layer decides how to expose it (HTTP, CLI, RPC).
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::identity::MachineId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub machine_id: MachineId,
    pub peer_count: usize,
    pub unreachable_peers: Vec<MachineId>,
    pub memory_count: usize,
    pub ring_fill_pct: f32,
    pub last_digest_at: Option<i64>,
    pub lag_per_peer: HashMap<MachineId, u64>,
}
