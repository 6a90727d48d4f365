//! The peer-facing wire envelope (§4.4). This is the only thing that
//! crosses the machine boundary for replication; fields are fixed and
//! unknown payload variants are preserved on re-serialization via an
//! `Unknown` catch-all rather than erroring.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::identity::{MachineId, Version};
use crate::memory::{Change, ChangeKind};
use crate::types::{Broadcast, Memory, Task};

/// Destination of a `SyncMessage`: a specific peer, or every reachable
/// peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    Peer(MachineId),
    Broadcast,
}

/// `{checkpoint_version_per_origin_machine, hash_of_recent_ids}` of
/// §4.4: a compact summary of locally-known collective-scope ids,
/// compared between peers to detect divergence before falling back to
/// a full `Request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
    pub checkpoint_version_per_origin_machine: HashMap<MachineId, u64>,
    pub root_hash: [u8; 32],
    pub bloom_expected_items: usize,
    pub bloom_bits: Vec<bool>,
    pub bloom_hash_count: usize,
}

/// A request for the Changes a peer is missing, named by origin
/// machine and the version range not yet seen from that origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRange {
    pub origin_machine: MachineId,
    pub from_counter_exclusive: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub missing: Vec<VersionRange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub now_wall: i64,
    pub load_hint: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAck {
    pub task_id: String,
    pub agent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCancel {
    pub task_id: String,
}

/// Versioned payload carried by a `SyncMessage`. New variants must be
/// additive; a peer on an older build that doesn't recognize a variant
/// decodes it into `Unknown` and forwards/ignores it rather than
/// failing the whole envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    Change {
        kind: ChangeKindWire,
        memory: Memory,
    },
    Digest(Digest),
    Request(Request),
    Heartbeat(HeartbeatPayload),
    Broadcast(Broadcast),
    Task(Task),
    TaskAck(TaskAck),
    TaskCancel(TaskCancel),
    Unknown {
        tag: String,
        raw: Vec<u8>,
    },
}

/// Wire twin of [`ChangeKind`]; kept distinct so `memory::ChangeKind`
/// can evolve without touching the envelope's serde representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKindWire {
    Create,
    Update,
    Delete,
    Recover,
}

impl From<ChangeKind> for ChangeKindWire {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Create => Self::Create,
            ChangeKind::Update => Self::Update,
            ChangeKind::Delete => Self::Delete,
            ChangeKind::Recover => Self::Recover,
        }
    }
}

impl From<ChangeKindWire> for ChangeKind {
    fn from(kind: ChangeKindWire) -> Self {
        match kind {
            ChangeKindWire::Create => Self::Create,
            ChangeKindWire::Update => Self::Update,
            ChangeKindWire::Delete => Self::Delete,
            ChangeKindWire::Recover => Self::Recover,
        }
    }
}

impl Payload {
    pub fn from_change(change: &Change) -> Self {
        Self::Change {
            kind: change.kind.into(),
            memory: change.memory.clone(),
        }
    }
}

/// The envelope itself: `{from, to, kind, seq, payload}` of §4.4.
/// `kind` is redundant with `payload`'s variant but kept as an explicit
/// tag so a receiver can route without fully decoding the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    pub from: MachineId,
    pub to: Destination,
    pub kind: MessageKind,
    /// Monotonic per `(from, to)` pair; used to resume a peer's outbox
    /// after reconnect and to detect duplicate redelivery.
    pub seq: u64,
    pub payload: Payload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Change,
    Digest,
    Request,
    Heartbeat,
    Broadcast,
    Task,
}

impl SyncMessage {
    pub fn change(from: MachineId, to: MachineId, seq: u64, change: &Change) -> Self {
        Self {
            from,
            to: Destination::Peer(to),
            kind: MessageKind::Change,
            seq,
            payload: Payload::from_change(change),
        }
    }

    pub fn heartbeat(from: MachineId, seq: u64, now_wall: i64, load_hint: f32) -> Self {
        Self {
            from,
            to: Destination::Broadcast,
            kind: MessageKind::Heartbeat,
            seq,
            payload: Payload::Heartbeat(HeartbeatPayload { now_wall, load_hint }),
        }
    }

    /// Encode with bincode and a 4-byte big-endian length prefix, as
    /// §4.4 specifies for both the push stream and the request/response
    /// exchange.
    pub fn encode(&self) -> crate::error::CollectiveResult<Vec<u8>> {
        let body = bincode::serialize(self)
            .map_err(|e| crate::error::CollectiveError::internal(format!("failed to encode sync message: {e}")))?;
        let mut framed = Vec::with_capacity(4 + body.len());
        framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
        framed.extend_from_slice(&body);
        Ok(framed)
    }

    pub fn decode(body: &[u8]) -> crate::error::CollectiveResult<Self> {
        bincode::deserialize(body)
            .map_err(|e| crate::error::CollectiveError::internal(format!("failed to decode sync message: {e}")))
    }
}
