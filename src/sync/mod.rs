//! Sync Engine (Y): replicates `Change` events between peer machines,
//! exchanges digests to detect divergence, and carries heartbeats,
//! broadcasts and tasks over the same envelope (§4.4).
pub mod digest;
pub mod envelope;
pub mod outbox;
pub mod transport;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{info, warn};

use crate::error::CollectiveResult;
use crate::identity::{LamportClock, MachineId};
use crate::memory::{Change, ChangeKind, MemoryStore};
use crate::types::{Memory, Scope, Task};

use envelope::{Destination, MessageKind, Payload, Request, SyncMessage, TaskAck, TaskCancel};
use outbox::PeerOutbox;
use transport::{PeerConnection, PeerListener};

/// Where `handle_connection` hands off `Task`/`TaskAck`/`TaskCancel`
/// payloads it receives: the Coordination Bus (C). Y only transports
/// the envelope; injected rather than referenced directly so M/Y don't
/// have to know C's construction (`CoordinationBus` is built after Y).
#[async_trait]
pub trait TaskSink: Send + Sync {
    async fn receive_task(&self, from: MachineId, task: Task);
    fn receive_task_ack(&self, ack: TaskAck);
    fn receive_task_cancel(&self, cancel: TaskCancel);
}

/// A peer this machine knows about, as handed back by the injected
/// `PeerRegistry`.
#[derive(Debug, Clone)]
pub struct Peer {
    pub machine_id: MachineId,
    pub endpoint: SocketAddr,
    pub last_seen: i64,
    pub reachable: bool,
}

/// Injected source of peer membership (§4.4: "Peers are configured or
/// discovered via a shared registry, opaque, injected as a trait").
pub trait PeerRegistry: Send + Sync {
    fn peers(&self) -> Vec<Peer>;
}

/// A fixed peer list resolved once from configuration.
pub struct StaticPeerRegistry {
    peers: Vec<Peer>,
}

impl StaticPeerRegistry {
    pub fn new(peers: Vec<Peer>) -> Self {
        Self { peers }
    }
}

impl PeerRegistry for StaticPeerRegistry {
    fn peers(&self) -> Vec<Peer> {
        self.peers.clone()
    }
}

/// Tracks the last heartbeat seen from each peer. Absence for `3·D`
/// marks a peer unreachable but never evicts it (§4.4 step 5) — that
/// is the Agent Registry's lease-eviction concern, not Y's.
#[derive(Default)]
pub struct HeartbeatTracker {
    last_seen: DashMap<MachineId, i64>,
}

impl HeartbeatTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, machine_id: MachineId, now_wall: i64) {
        self.last_seen.insert(machine_id, now_wall);
    }

    pub fn is_reachable(&self, machine_id: &MachineId, now_wall: i64, digest_interval: Duration) -> bool {
        match self.last_seen.get(machine_id) {
            Some(last) => now_wall - *last <= 3 * digest_interval.as_millis() as i64,
            None => false,
        }
    }
}

/// The Sync Engine (Y).
pub struct SyncEngine {
    machine_id: MachineId,
    clock: Arc<LamportClock>,
    store: Arc<MemoryStore>,
    registry: Arc<dyn PeerRegistry>,
    outboxes: DashMap<MachineId, Arc<PeerOutbox>>,
    heartbeats: HeartbeatTracker,
    digest_interval: Duration,
    heartbeat_interval: Duration,
    next_seq: std::sync::atomic::AtomicU64,
    task_sink: OnceLock<Arc<dyn TaskSink>>,
}

impl SyncEngine {
    pub fn new(
        machine_id: MachineId,
        clock: Arc<LamportClock>,
        store: Arc<MemoryStore>,
        registry: Arc<dyn PeerRegistry>,
        digest_interval: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            machine_id,
            clock,
            store,
            registry,
            outboxes: DashMap::new(),
            heartbeats: HeartbeatTracker::new(),
            digest_interval,
            heartbeat_interval,
            next_seq: std::sync::atomic::AtomicU64::new(1),
            task_sink: OnceLock::new(),
        }
    }

    /// Wire the Coordination Bus in once it exists (it's built after Y
    /// during startup). A no-op if already set.
    pub fn set_task_sink(&self, sink: Arc<dyn TaskSink>) {
        let _ = self.task_sink.set(sink);
    }

    pub fn machine_id(&self) -> &MachineId {
        &self.machine_id
    }

    pub fn digest_interval(&self) -> Duration {
        self.digest_interval
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    fn outbox_for(&self, peer: &MachineId) -> Arc<PeerOutbox> {
        self.outboxes
            .entry(peer.clone())
            .or_insert_with(|| Arc::new(PeerOutbox::new(peer.clone())))
            .clone()
    }

    /// Fan a locally-committed Change out to every known peer's
    /// outbox. `scope = machine-local` Changes never reach an outbox
    /// (§4.1, §4.4 step 4).
    pub fn enqueue_change(&self, change: Change) {
        if change.memory.scope == Scope::MachineLocal {
            return;
        }
        for peer in self.registry.peers() {
            if peer.machine_id == self.machine_id {
                continue;
            }
            self.outbox_for(&peer.machine_id).push(change.clone());
        }
    }

    /// Drains M's change ring, enqueuing every Change for replication.
    /// Runs until the sender half (owned by M) is dropped.
    pub async fn drain_changes(&self, mut change_rx: tokio::sync::mpsc::Receiver<Change>) {
        while let Some(change) = change_rx.recv().await {
            self.enqueue_change(change);
        }
    }

    /// Apply an inbound Change from a peer. Idempotent on `id`: a
    /// stale or duplicate version is folded into local shadow history
    /// by `MemoryStore::apply_remote` rather than erroring.
    pub async fn receive_change(&self, kind: ChangeKind, memory: Memory) -> CollectiveResult<()> {
        self.clock.observe(memory.version.counter);
        self.store.apply_remote(Change { kind, memory })
    }

    fn local_collective_ids(&self) -> Vec<String> {
        self.store
            .list_recent(None, 0)
            .into_iter()
            .filter(|m| m.scope == Scope::Collective)
            .map(|m| m.id)
            .collect()
    }

    /// Build this machine's digest payload (§4.4 step 2).
    pub fn build_digest(&self) -> envelope::Digest {
        let ids = self.local_collective_ids();
        let mut checkpoints = HashMap::new();
        checkpoints.insert(self.machine_id.clone(), self.clock.current());
        digest::build_digest(&ids, checkpoints)
    }

    /// Given a peer's digest, the ids this machine holds that the peer
    /// is missing.
    pub fn missing_for_peer(&self, remote: &envelope::Digest) -> Vec<String> {
        let ids = self.local_collective_ids();
        digest::find_missing_for_peer(&ids, remote)
    }

    pub fn record_heartbeat(&self, from: MachineId, now_wall: i64) {
        self.heartbeats.record(from, now_wall);
    }

    pub fn is_peer_reachable(&self, peer: &MachineId, now_wall: i64) -> bool {
        self.heartbeats.is_reachable(peer, now_wall, self.digest_interval)
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.registry.peers()
    }

    /// One pass of `sync_once` against every known peer, logging rather
    /// than failing the whole pass when an individual peer is
    /// unreachable. Intended to be called on a `digest_interval` timer.
    pub async fn run_periodic_sync(&self) {
        for peer in self.peers() {
            if peer.machine_id == self.machine_id {
                continue;
            }
            if let Err(e) = self.sync_once(&peer).await {
                warn!(peer = %peer.machine_id, error = %e, "periodic sync pass failed");
            }
        }
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    /// Dial `peer`, drain its outbox over the connection, and exchange
    /// one round of heartbeat + digest. A single pass; the caller loops
    /// this on a timer per peer (`heartbeat_interval` for the push side,
    /// `digest_interval` for the digest side share the same connection
    /// here for simplicity).
    pub async fn sync_once(&self, peer: &Peer) -> CollectiveResult<()> {
        let mut conn = PeerConnection::connect(peer.endpoint).await?;

        let heartbeat = SyncMessage::heartbeat(
            self.machine_id.clone(),
            self.next_seq(),
            chrono::Utc::now().timestamp_millis(),
            0.0,
        );
        conn.send(&heartbeat).await?;

        let outbox = self.outbox_for(&peer.machine_id);
        while let Some(queued) = outbox.pop() {
            let msg = SyncMessage::change(self.machine_id.clone(), peer.machine_id.clone(), queued.seq, &queued.change);
            if let Err(e) = conn.send(&msg).await {
                warn!(peer = %peer.machine_id, error = %e, "failed to deliver change; re-queuing");
                outbox.push(queued.change);
                return Err(e);
            }
        }

        let digest_msg = SyncMessage {
            from: self.machine_id.clone(),
            to: Destination::Peer(peer.machine_id.clone()),
            kind: MessageKind::Digest,
            seq: self.next_seq(),
            payload: Payload::Digest(self.build_digest()),
        };
        conn.send(&digest_msg).await?;

        // The peer replies with every Change it holds that our digest
        // didn't account for, followed by an empty `Request` as an
        // end-of-catch-up marker (§4.4 step 2).
        let mut caught_up = 0usize;
        loop {
            match conn.receive().await? {
                SyncMessage { payload: Payload::Change { kind, memory }, .. } => {
                    self.receive_change(kind.into(), memory).await?;
                    caught_up += 1;
                }
                SyncMessage { payload: Payload::Request(_), .. } => break,
                _ => break,
            }
        }
        if caught_up > 0 {
            info!(peer = %peer.machine_id, count = caught_up, "applied changes from digest catch-up");
        }

        info!(peer = %peer.machine_id, "completed sync pass");
        Ok(())
    }

    /// Accept inbound connections and dispatch each message to the
    /// matching handler. Runs until the listener errors out (e.g.
    /// shutdown closes the socket).
    pub async fn serve(self: Arc<Self>, listener: PeerListener) {
        loop {
            match listener.accept().await {
                Ok(mut conn) => {
                    let engine = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = engine.handle_connection(&mut conn).await {
                            warn!(error = %e, "sync connection ended with an error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "peer listener stopped accepting connections");
                    break;
                }
            }
        }
    }

    async fn handle_connection(&self, conn: &mut PeerConnection) -> CollectiveResult<()> {
        loop {
            let message = conn.receive().await?;
            match message.payload {
                Payload::Change { kind, memory } => {
                    self.receive_change(kind.into(), memory).await?;
                }
                Payload::Heartbeat(hb) => {
                    self.record_heartbeat(message.from.clone(), hb.now_wall);
                }
                Payload::Digest(remote_digest) => {
                    let missing = self.missing_for_peer(&remote_digest);
                    if !missing.is_empty() {
                        info!(peer = %message.from, count = missing.len(), "streaming changes peer is missing");
                    }
                    for id in &missing {
                        if let Ok(memory) = self.store.get(id, false) {
                            let change_msg =
                                SyncMessage::change(self.machine_id.clone(), message.from.clone(), self.next_seq(), &Change { kind: ChangeKind::Create, memory });
                            conn.send(&change_msg).await?;
                        }
                    }
                    let done = SyncMessage {
                        from: self.machine_id.clone(),
                        to: Destination::Peer(message.from.clone()),
                        kind: MessageKind::Request,
                        seq: self.next_seq(),
                        payload: Payload::Request(Request { missing: Vec::new() }),
                    };
                    conn.send(&done).await?;
                }
                Payload::Request(_) => {
                    // An end-of-catch-up marker arriving outside
                    // `sync_once`'s own read loop (e.g. a peer that
                    // initiated a digest exchange we didn't ask for);
                    // nothing further to do.
                }
                Payload::Task(task) => {
                    if let Some(sink) = self.task_sink.get() {
                        sink.receive_task(message.from.clone(), task).await;
                    } else {
                        warn!(task_id = %task.task_id, "dropping inbound task: coordination bus not wired");
                    }
                }
                Payload::TaskAck(ack) => {
                    if let Some(sink) = self.task_sink.get() {
                        sink.receive_task_ack(ack);
                    }
                }
                Payload::TaskCancel(cancel) => {
                    if let Some(sink) = self.task_sink.get() {
                        sink.receive_task_cancel(cancel);
                    }
                }
                Payload::Broadcast(_) => {
                    // Handled by the Coordination Bus (C); the sync
                    // engine only transports the envelope.
                }
                Payload::Unknown { tag, .. } => {
                    warn!(tag, "ignoring sync payload from a newer/unknown wire variant");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfidenceWeights;
    use crate::types::{Category, Importance};
    use std::collections::HashSet;

    fn test_engine() -> (Arc<SyncEngine>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let machine_id = MachineId("m1".into());
        let clock = Arc::new(LamportClock::new(machine_id.clone()));
        let (store, change_rx) = MemoryStore::open(
            dir.path(),
            machine_id.clone(),
            clock.clone(),
            None,
            ConfidenceWeights::default(),
            Duration::from_secs(3600),
            64,
        )
        .unwrap();
        drop(change_rx);
        let store = Arc::new(store);
        let registry = Arc::new(StaticPeerRegistry::new(vec![Peer {
            machine_id: MachineId("m2".into()),
            endpoint: "127.0.0.1:0".parse().unwrap(),
            last_seen: 0,
            reachable: true,
        }]));
        let engine = Arc::new(SyncEngine::new(
            machine_id,
            clock,
            store,
            registry,
            Duration::from_secs(60),
            Duration::from_secs(5),
        ));
        (engine, dir)
    }

    #[tokio::test]
    async fn machine_local_changes_are_never_enqueued() {
        let (engine, _dir) = test_engine();
        let change = Change {
            kind: ChangeKind::Create,
            memory: Memory {
                id: "m1:x".into(),
                content: "c".into(),
                category: Category::Global,
                tags: HashSet::new(),
                scope: Scope::MachineLocal,
                importance: Importance::Normal,
                origin: crate::types::Origin { machine_id: MachineId("m1".into()), agent_id: "a".into(), created_at_wall: 0 },
                version: engine.clock.next(),
                vector_ref: None,
                confidence: crate::types::ConfidenceSnapshot::default(),
                state: crate::types::MemoryState::Active,
                deleted_at: None,
                delete_reason: None,
                deleted_by: None,
                shadow_history: Vec::new(),
                extensions: serde_json::Map::new(),
            },
        };
        engine.enqueue_change(change);
        let outbox = engine.outbox_for(&MachineId("m2".into()));
        assert!(outbox.is_empty());
    }

    #[tokio::test]
    async fn collective_changes_are_enqueued_for_every_other_peer() {
        let (engine, _dir) = test_engine();
        let change = Change {
            kind: ChangeKind::Create,
            memory: Memory {
                id: "m1:y".into(),
                content: "c".into(),
                category: Category::Global,
                tags: HashSet::new(),
                scope: Scope::Collective,
                importance: Importance::Normal,
                origin: crate::types::Origin { machine_id: MachineId("m1".into()), agent_id: "a".into(), created_at_wall: 0 },
                version: engine.clock.next(),
                vector_ref: None,
                confidence: crate::types::ConfidenceSnapshot::default(),
                state: crate::types::MemoryState::Active,
                deleted_at: None,
                delete_reason: None,
                deleted_by: None,
                shadow_history: Vec::new(),
                extensions: serde_json::Map::new(),
            },
        };
        engine.enqueue_change(change);
        let outbox = engine.outbox_for(&MachineId("m2".into()));
        assert_eq!(outbox.len(), 1);
    }

    #[tokio::test]
    async fn peer_is_unreachable_until_a_heartbeat_is_recorded() {
        let (engine, _dir) = test_engine();
        let peer = MachineId("m2".into());
        assert!(!engine.is_peer_reachable(&peer, 10_000));
        engine.record_heartbeat(peer.clone(), 10_000);
        assert!(engine.is_peer_reachable(&peer, 10_000 + 60_000));
        assert!(!engine.is_peer_reachable(&peer, 10_000 + 4 * 60_000));
    }
}
