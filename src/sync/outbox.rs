//! Per-peer outbox (§4.4 step 1): a single-producer single-consumer
//! queue of `Change`s to replicate to one peer, resumable by `seq`
//! after a reconnect.
use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::identity::MachineId;
use crate::memory::Change;

/// One outstanding `Change` queued for a specific peer, stamped with
/// the `seq` it will carry on the wire.
pub struct QueuedChange {
    pub seq: u64,
    pub change: Change,
}

/// The outbox for a single peer. Enqueued in Change-commit order by M
/// (via the Sync Engine's drain of the change ring); drained in order
/// by the peer's send loop. On reconnect, `resume_from` drops anything
/// at or before the peer's last-acked `seq` so redelivery only covers
/// what the peer actually missed.
pub struct PeerOutbox {
    peer: MachineId,
    queue: Mutex<VecDeque<QueuedChange>>,
    next_seq: Mutex<u64>,
}

impl PeerOutbox {
    pub fn new(peer: MachineId) -> Self {
        Self {
            peer,
            queue: Mutex::new(VecDeque::new()),
            next_seq: Mutex::new(1),
        }
    }

    pub fn peer(&self) -> &MachineId {
        &self.peer
    }

    /// Append a change, assigning it the next `seq` for this peer.
    pub fn push(&self, change: Change) -> u64 {
        let mut next_seq = self.next_seq.lock();
        let seq = *next_seq;
        *next_seq += 1;
        self.queue.lock().push_back(QueuedChange { seq, change });
        seq
    }

    /// Pop the next queued change, if any, in FIFO order.
    pub fn pop(&self) -> Option<QueuedChange> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Drop everything at or before `acked_seq`: the peer has already
    /// applied it, so redelivering it on reconnect would be wasted
    /// (though not incorrect — application is idempotent on `id`).
    pub fn acknowledge_through(&self, acked_seq: u64) {
        let mut queue = self.queue.lock();
        while matches!(queue.front(), Some(q) if q.seq <= acked_seq) {
            queue.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::LamportClock;
    use crate::memory::ChangeKind;
    use crate::types::{Category, ConfidenceSnapshot, Importance, MemoryState, Origin, Scope};
    use std::collections::HashSet;

    fn sample_change(clock: &LamportClock, machine_id: &MachineId) -> Change {
        Change {
            kind: ChangeKind::Create,
            memory: crate::types::Memory {
                id: format!("{}:x", machine_id.as_str()),
                content: "c".into(),
                category: Category::Global,
                tags: HashSet::new(),
                scope: Scope::Collective,
                importance: Importance::Normal,
                origin: Origin { machine_id: machine_id.clone(), agent_id: "a".into(), created_at_wall: 0 },
                version: clock.next(),
                vector_ref: None,
                confidence: ConfidenceSnapshot::default(),
                state: MemoryState::Active,
                deleted_at: None,
                delete_reason: None,
                deleted_by: None,
                shadow_history: Vec::new(),
                extensions: serde_json::Map::new(),
            },
        }
    }

    #[test]
    fn pushed_changes_drain_in_fifo_order_with_increasing_seq() {
        let machine_id = MachineId("m1".into());
        let clock = LamportClock::new(machine_id.clone());
        let outbox = PeerOutbox::new(MachineId("m2".into()));

        let seq1 = outbox.push(sample_change(&clock, &machine_id));
        let seq2 = outbox.push(sample_change(&clock, &machine_id));
        assert_eq!(seq1, 1);
        assert_eq!(seq2, 2);

        let first = outbox.pop().unwrap();
        assert_eq!(first.seq, 1);
        let second = outbox.pop().unwrap();
        assert_eq!(second.seq, 2);
        assert!(outbox.pop().is_none());
    }

    #[test]
    fn acknowledge_through_drops_only_up_to_the_given_seq() {
        let machine_id = MachineId("m1".into());
        let clock = LamportClock::new(machine_id.clone());
        let outbox = PeerOutbox::new(MachineId("m2".into()));
        for _ in 0..5 {
            outbox.push(sample_change(&clock, &machine_id));
        }

        outbox.acknowledge_through(3);
        assert_eq!(outbox.len(), 2);
        let remaining = outbox.pop().unwrap();
        assert_eq!(remaining.seq, 4);
    }
}
