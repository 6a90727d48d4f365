//! Coordination Bus (C, §4.6): ephemeral, at-least-once fleet-wide
//! messaging — Broadcast, Task delegation, and Discovery.
pub mod broadcast;
pub mod discovery;
pub mod task;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{info, warn};

use crate::agents::{route, AgentDirectory};
use crate::error::{CollectiveError, CollectiveResult};
use crate::identity::MachineId;
use crate::memory::MemoryStore;
use crate::sync::envelope::{Destination, MessageKind, Payload, SyncMessage, TaskAck, TaskCancel};
use crate::sync::transport::PeerConnection;
use crate::sync::{PeerRegistry, TaskSink};
use crate::types::{Broadcast, Category, Importance, Priority, Scope, Severity, Task};

pub use broadcast::BroadcastDedup;
pub use task::TaskBoard;

const MAX_TASK_RETRIES: u32 = 1;

/// The Coordination Bus.
pub struct CoordinationBus {
    machine_id: MachineId,
    memory: Arc<MemoryStore>,
    agents: Arc<AgentDirectory>,
    registry: Arc<dyn PeerRegistry>,
    dedup: BroadcastDedup,
    board: TaskBoard,
    retry_counts: DashMap<String, u32>,
    next_seq: std::sync::atomic::AtomicU64,
}

impl CoordinationBus {
    pub fn new(
        machine_id: MachineId,
        memory: Arc<MemoryStore>,
        agents: Arc<AgentDirectory>,
        registry: Arc<dyn PeerRegistry>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            machine_id,
            memory,
            agents,
            registry,
            dedup: BroadcastDedup::new(),
            board: TaskBoard::new(ack_timeout),
            retry_counts: DashMap::new(),
            next_seq: std::sync::atomic::AtomicU64::new(1),
        }
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    /// Best-effort fan-out of an envelope to every reachable peer.
    /// Failures are logged, not propagated: a Broadcast/Task is
    /// delivered at-least-once across whichever peers were reachable,
    /// per §4.6, not guaranteed across all of them synchronously.
    async fn fan_out(&self, payload: Payload, kind: MessageKind) {
        for peer in self.registry.peers() {
            if peer.machine_id == self.machine_id {
                continue;
            }
            let msg = SyncMessage {
                from: self.machine_id.clone(),
                to: Destination::Peer(peer.machine_id.clone()),
                kind,
                seq: self.next_seq(),
                payload: payload.clone(),
            };
            match PeerConnection::connect(peer.endpoint).await {
                Ok(mut conn) => {
                    if let Err(e) = conn.send(&msg).await {
                        warn!(peer = %peer.machine_id, error = %e, "failed to deliver bus message");
                    }
                }
                Err(e) => warn!(peer = %peer.machine_id, error = %e, "could not reach peer for bus message"),
            }
        }
    }

    /// `broadcast()` of §6: publish and fan out, deduping locally so a
    /// loopback or retry doesn't double-deliver to this machine's own
    /// consumers.
    pub async fn publish_broadcast(&self, agent_id: String, category: Category, severity: Severity, message: String) -> Broadcast {
        let b = broadcast::new_broadcast(&self.machine_id, agent_id, category, severity, message);
        self.dedup.observe(&b.id);
        self.fan_out(Payload::Broadcast(b.clone()), MessageKind::Broadcast).await;
        b
    }

    /// Handle an inbound Broadcast. Returns `false` if this is a
    /// duplicate delivery (e.g. from a partition) that should be
    /// silently dropped.
    pub fn receive_broadcast(&self, b: &Broadcast) -> bool {
        self.dedup.observe(&b.id)
    }

    /// `discovery()` of §4.6: announce a fact fleet-wide and persist it
    /// as a searchable memory.
    pub async fn announce_discovery(&self, agent_id: String, category: Category, message: String) -> CollectiveResult<Broadcast> {
        let d = discovery::new_discovery(&self.machine_id, agent_id.clone(), category, message.clone());
        self.memory
            .store(message, category, d.tags.clone(), Scope::Collective, Importance::Normal, agent_id)
            .await?;
        self.dedup.observe(&d.broadcast.id);
        self.fan_out(Payload::Broadcast(d.broadcast.clone()), MessageKind::Broadcast).await;
        Ok(d.broadcast)
    }

    async fn record_task_memory(&self, task: &Task, requester_agent_id: &str) {
        let mut tags = HashSet::new();
        tags.insert("task".to_string());
        let content = format!("task {} ({:?}): {}", task.task_id, task.state, task.description);
        if let Err(e) = self
            .memory
            .store(content, Category::Global, tags, Scope::Collective, Importance::Normal, requester_agent_id.to_string())
            .await
        {
            warn!(task_id = %task.task_id, error = %e, "failed to record task history memory");
        }
    }

    /// `delegate_task()` of §6: route to a capable agent, then either
    /// hand the task off locally or forward it to the agent's machine
    /// and await an explicit `TaskAck`.
    pub async fn delegate_task(
        &self,
        requester_agent_id: &str,
        description: String,
        required_capabilities: HashSet<String>,
        priority: Priority,
    ) -> CollectiveResult<Task> {
        let agent_id = route(&self.agents.registry(), &self.machine_id, &required_capabilities, None)?;
        let agent = self
            .agents
            .registry()
            .get(&agent_id)
            .ok_or_else(|| CollectiveError::not_found("agent", &agent_id))?;

        let task = task::new_task(description, required_capabilities, priority);
        self.board.insert(task.clone());
        self.board.assign(&task.task_id, agent_id.clone())?;

        if agent.machine_id == self.machine_id {
            // Local hand-off: no network round trip needed for acceptance.
            self.board.acknowledge(&task.task_id, &agent_id)?;
        } else if let Some(peer) = self.registry.peers().into_iter().find(|p| p.machine_id == agent.machine_id) {
            let msg = SyncMessage {
                from: self.machine_id.clone(),
                to: Destination::Peer(peer.machine_id.clone()),
                kind: MessageKind::Task,
                seq: self.next_seq(),
                payload: Payload::Task(task.clone()),
            };
            match PeerConnection::connect(peer.endpoint).await {
                Ok(mut conn) => {
                    if let Err(e) = conn.send(&msg).await {
                        warn!(task_id = %task.task_id, error = %e, "failed to forward task to assignee's machine");
                    }
                }
                Err(e) => warn!(task_id = %task.task_id, error = %e, "could not reach assignee's machine"),
            }
        }

        let recorded = self.board.get(&task.task_id).unwrap_or(task);
        self.record_task_memory(&recorded, requester_agent_id).await;
        Ok(recorded)
    }

    /// Handle an inbound `TaskAck` from an assignee.
    pub fn handle_task_ack(&self, ack: TaskAck) -> CollectiveResult<()> {
        self.board.acknowledge(&ack.task_id, &ack.agent_id)
    }

    /// `TaskCancel{task_id}` (§4.6): advisory once sent; the assignee
    /// honors it at its next cooperative checkpoint.
    pub async fn cancel_task(&self, task_id: &str) -> CollectiveResult<()> {
        self.board.cancel(task_id)?;
        let task = self.board.get(task_id);
        if let Some(task) = task {
            self.fan_out(
                Payload::TaskCancel(TaskCancel { task_id: task.task_id.clone() }),
                MessageKind::Task,
            )
            .await;
        }
        Ok(())
    }

    /// Sweep tasks whose ack deadline passed. Each gets one retry
    /// (re-routed, possibly to a different agent); a second miss
    /// downgrades the task to `Failed` rather than retrying forever.
    pub async fn sweep_overdue_tasks(&self) {
        for task_id in self.board.overdue_acks() {
            let retries = self.retry_counts.entry(task_id.clone()).or_insert(0);
            let attempt = *retries;
            drop(retries);
            if attempt >= MAX_TASK_RETRIES {
                warn!(task_id = %task_id, "task ack exceeded retries, downgrading to failed");
                let _ = self.board.fail(&task_id);
                self.retry_counts.remove(&task_id);
                continue;
            }
            self.retry_counts.insert(task_id.clone(), attempt + 1);
            if let Some(task) = self.board.get(&task_id) {
                match route(&self.agents.registry(), &self.machine_id, &task.required_capabilities, None) {
                    Ok(agent_id) => {
                        info!(task_id = %task_id, agent_id = %agent_id, "retrying task delegation after missed ack");
                        let _ = self.board.assign(&task_id, agent_id);
                    }
                    Err(_) => {
                        warn!(task_id = %task_id, "no capable agent available on retry, downgrading to failed");
                        let _ = self.board.fail(&task_id);
                    }
                }
            }
        }
    }

    pub fn board(&self) -> &TaskBoard {
        &self.board
    }
}

/// Inbound `Task`/`TaskAck`/`TaskCancel` handoff from Y (§4.6, S4:
/// cross-machine delegation). A delegated `Task` arrives already
/// `Assigned` to a local agent by the requester; accepting it here and
/// acking back to `from` is what makes `delegate_task`'s forwarded
/// branch actually complete.
#[async_trait]
impl TaskSink for CoordinationBus {
    async fn receive_task(&self, from: MachineId, task: Task) {
        let task_id = task.task_id.clone();
        let Some(agent_id) = task.assignee_agent_id.clone() else {
            warn!(task_id = %task_id, "received task with no assignee, ignoring");
            return;
        };
        if self.agents.registry().get(&agent_id).is_none() {
            warn!(task_id = %task_id, agent_id = %agent_id, "received task for an agent not hosted on this machine");
            return;
        }

        self.board.insert(task.clone());
        if let Err(e) = self.board.acknowledge(&task_id, &agent_id) {
            warn!(task_id = %task_id, error = %e, "failed to acknowledge inbound task");
            return;
        }
        self.record_task_memory(&task, &agent_id).await;

        if let Some(peer) = self.registry.peers().into_iter().find(|p| p.machine_id == from) {
            let msg = SyncMessage {
                from: self.machine_id.clone(),
                to: Destination::Peer(peer.machine_id.clone()),
                kind: MessageKind::Task,
                seq: self.next_seq(),
                payload: Payload::TaskAck(TaskAck { task_id, agent_id }),
            };
            match PeerConnection::connect(peer.endpoint).await {
                Ok(mut conn) => {
                    if let Err(e) = conn.send(&msg).await {
                        warn!(peer = %peer.machine_id, error = %e, "failed to ack delegated task back to requester");
                    }
                }
                Err(e) => warn!(peer = %peer.machine_id, error = %e, "could not reach requester to ack delegated task"),
            }
        }
    }

    fn receive_task_ack(&self, ack: TaskAck) {
        if let Err(e) = self.handle_task_ack(ack) {
            warn!(error = %e, "failed to apply inbound task ack");
        }
    }

    fn receive_task_cancel(&self, cancel: TaskCancel) {
        if let Err(e) = self.board.cancel(&cancel.task_id) {
            warn!(task_id = %cancel.task_id, error = %e, "failed to apply inbound task cancel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfidenceWeights;
    use crate::identity::LamportClock;
    use crate::sync::{Peer, StaticPeerRegistry};

    async fn test_bus() -> (CoordinationBus, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let machine_id = MachineId("m1".into());
        let clock = Arc::new(LamportClock::new(machine_id.clone()));
        let (store, rx) = MemoryStore::open(
            dir.path(),
            machine_id.clone(),
            clock,
            None,
            ConfidenceWeights::default(),
            Duration::from_secs(3600),
            64,
        )
        .unwrap();
        drop(rx);
        let store = Arc::new(store);
        let agents = Arc::new(AgentDirectory::new(machine_id.clone(), Duration::from_secs(300)));
        let registry: Arc<dyn PeerRegistry> = Arc::new(StaticPeerRegistry::new(Vec::<Peer>::new()));
        let bus = CoordinationBus::new(machine_id, store, agents, registry, Duration::from_millis(50));
        (bus, dir)
    }

    #[tokio::test]
    async fn duplicate_broadcasts_are_deduped() {
        let (bus, _dir) = test_bus().await;
        let b = bus.publish_broadcast("a1".into(), Category::Global, Severity::Info, "hi".into()).await;
        assert!(!bus.receive_broadcast(&b));
    }

    #[tokio::test]
    async fn delegate_task_to_local_agent_acks_immediately() {
        let (bus, _dir) = test_bus().await;
        let caps: HashSet<String> = ["search".to_string()].into_iter().collect();
        bus.agents.register("worker", caps.clone());

        let task = bus.delegate_task("requester", "find stuff".into(), caps, Priority::Medium).await.unwrap();
        assert_eq!(task.state, crate::types::TaskState::InProgress);
    }

    #[tokio::test]
    async fn delegate_task_with_no_capable_agent_errors() {
        let (bus, _dir) = test_bus().await;
        let caps: HashSet<String> = ["search".to_string()].into_iter().collect();
        let result = bus.delegate_task("requester", "find stuff".into(), caps, Priority::Medium).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn announce_discovery_persists_a_searchable_memory() {
        let (bus, _dir) = test_bus().await;
        bus.announce_discovery("a1".into(), Category::Runbooks, "found a workaround".into()).await.unwrap();
        let recent = bus.memory.list_recent(Some(Category::Runbooks), 0);
        assert_eq!(recent.len(), 1);
        assert!(recent[0].tags.contains("discovery"));
    }
}
