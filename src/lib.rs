//! # collective-core
//!
//! Core library for **the Collective**: a distributed memory and
//! coordination fabric for a fleet of AI agents spread across multiple
//! machines.
//!
//! Six components, each with a single responsibility, started in
//! dependency order:
//!
//! - **I** — Identity & Clock (`identity`): machine identity, the
//!   Lamport clock that orders writes across the fleet.
//! - **M** — Memory Store (`memory`): the durable, versioned record of
//!   everything the fleet knows, with conflict resolution and
//!   confidence scoring.
//! - **S** — Semantic Index (`vector`): an adapter turning M's
//!   memories into a searchable vector index, behind an injected
//!   embedder.
//! - **Y** — Sync Engine (`sync`): replicates Changes between peers,
//!   exchanges digests to detect divergence, carries heartbeats.
//! - **A** — Agent Registry & Router (`agents`): who can do what,
//!   where, and picks an agent for a task.
//! - **C** — Coordination Bus (`bus`): ephemeral, at-least-once
//!   fleet-wide messaging (broadcasts, task delegation, discovery).
//!
//! [`Collective`] wires all six together and exposes the agent-facing
//! operations of the external interface as plain async methods;
//! binding them to a wire format (HTTP, RPC) is left to callers.
pub mod agents;
pub mod bus;
pub mod config;
pub mod error;
pub mod health;
pub mod identity;
pub mod memory;
pub mod sync;
pub mod types;
pub mod vector;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use config::Config;
pub use error::{CollectiveError, CollectiveResult};
pub use health::HealthReport;
pub use identity::{LamportClock, MachineId, Version};

use agents::{AgentDirectory, Affinity, RosterFilter};
use bus::CoordinationBus;
use memory::{Change, MemoryPatch, MemoryStore};
use sync::transport::PeerListener;
use sync::{Peer, PeerRegistry, StaticPeerRegistry, SyncEngine};
use types::{Agent, AgentStatus, Broadcast, Category, Importance, Memory, Priority, Scope, Task};
use vector::{Embedder, MemorySearchHit, SearchFilter, SemanticIndex};

/// Top-level handle wiring every component together in the documented
/// start order: I → M → Y → {A, C}. Clone-free; shared via `Arc`.
pub struct Collective {
    machine_id: MachineId,
    clock: Arc<LamportClock>,
    memory: Arc<MemoryStore>,
    index: Option<Arc<SemanticIndex>>,
    sync_engine: Arc<SyncEngine>,
    agents: Arc<AgentDirectory>,
    bus: Arc<CoordinationBus>,
    config: Config,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Collective {
    /// Build every component in dependency order and spawn its
    /// background loops. `embedder` is optional: without one, M still
    /// works, just without semantic search (§4.3 treats S as an
    /// optional adapter, not a hard dependency).
    pub async fn start(config: Config, embedder: Option<Arc<dyn Embedder>>) -> CollectiveResult<Arc<Self>> {
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| CollectiveError::internal(format!("failed to create data dir: {e}")))?;

        // I
        let machine_id = MachineId::load_or_create(&config.data_dir.join("machine_id"))?;
        let clock = Arc::new(LamportClock::new(machine_id.clone()));
        info!(machine_id = %machine_id, "identity established");

        // S, wired into M if an embedder was supplied.
        let index = embedder.map(|e| Arc::new(SemanticIndex::with_flat_index(e)));

        // M
        let (memory, change_rx) = MemoryStore::open(
            &config.data_dir,
            machine_id.clone(),
            clock.clone(),
            index.clone(),
            config.confidence_weights.clone(),
            config.retention_window,
            config.change_ring_capacity,
        )?;
        let memory = Arc::new(memory);

        // Y. Peer addresses from config have no known machine id until
        // a heartbeat is exchanged, so the address itself seeds the
        // placeholder id; `HeartbeatTracker`/`merge_remote`-style
        // reconciliation is a known simplification (see DESIGN.md).
        let peers: Vec<Peer> = config
            .peers
            .iter()
            .filter_map(|addr| {
                addr.parse().ok().map(|endpoint| Peer {
                    machine_id: MachineId(addr.clone()),
                    endpoint,
                    last_seen: 0,
                    reachable: false,
                })
            })
            .collect();
        let registry: Arc<dyn PeerRegistry> = Arc::new(StaticPeerRegistry::new(peers));
        let sync_engine = Arc::new(SyncEngine::new(
            machine_id.clone(),
            clock.clone(),
            memory.clone(),
            registry.clone(),
            config.digest_interval,
            config.heartbeat_interval,
        ));

        // A, C
        let agents = Arc::new(AgentDirectory::new(machine_id.clone(), config.agent_lease));
        let bus = Arc::new(CoordinationBus::new(
            machine_id.clone(),
            memory.clone(),
            agents.clone(),
            registry,
            config.task_ack_timeout,
        ));
        sync_engine.set_task_sink(bus.clone());

        let shutdown = CancellationToken::new();
        let collective = Arc::new(Self {
            machine_id,
            clock,
            memory,
            index,
            sync_engine,
            agents,
            bus,
            config,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        });

        collective.spawn_background_tasks(change_rx);
        Ok(collective)
    }

    fn spawn_background_tasks(self: &Arc<Self>, change_rx: mpsc::Receiver<Change>) {
        let mut tasks = self.tasks.lock().unwrap();

        let engine = self.sync_engine.clone();
        tasks.push(tokio::spawn(async move {
            engine.drain_changes(change_rx).await;
        }));

        if let Ok(addr) = self.config.bind_addr.parse() {
            let engine = self.sync_engine.clone();
            let shutdown = self.shutdown.clone();
            tasks.push(tokio::spawn(async move {
                match PeerListener::bind(addr).await {
                    Ok(listener) => {
                        tokio::select! {
                            _ = engine.serve(listener) => {}
                            _ = shutdown.cancelled() => {}
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to bind peer listener"),
                }
            }));
        }

        {
            let engine = self.sync_engine.clone();
            let shutdown = self.shutdown.clone();
            let interval = self.config.digest_interval;
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => engine.run_periodic_sync().await,
                        _ = shutdown.cancelled() => break,
                    }
                }
            }));
        }

        {
            let agents = self.agents.clone();
            let shutdown = self.shutdown.clone();
            let interval = self.config.heartbeat_interval;
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => { agents.sweep_leases(); }
                        _ = shutdown.cancelled() => break,
                    }
                }
            }));
        }

        {
            let bus = self.bus.clone();
            let shutdown = self.shutdown.clone();
            let interval = self.config.task_ack_timeout;
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => bus.sweep_overdue_tasks().await,
                        _ = shutdown.cancelled() => break,
                    }
                }
            }));
        }
    }

    /// Signal every background loop to stop and abort its task handle.
    /// In-flight writes to M are transactional per operation (§5), so
    /// there is nothing to roll back here beyond ending the loops.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let mut tasks = self.tasks.lock().unwrap();
        for task in tasks.drain(..) {
            task.abort();
        }
        info!(machine_id = %self.machine_id, "collective stopped");
    }

    pub fn machine_id(&self) -> &MachineId {
        &self.machine_id
    }

    pub fn health(&self) -> HealthReport {
        let now = chrono::Utc::now().timestamp_millis();
        let peers = self.sync_engine.peers();
        let unreachable: Vec<MachineId> = peers
            .iter()
            .filter(|p| !self.sync_engine.is_peer_reachable(&p.machine_id, now))
            .map(|p| p.machine_id.clone())
            .collect();
        HealthReport {
            machine_id: self.machine_id.clone(),
            peer_count: peers.len(),
            unreachable_peers: unreachable,
            memory_count: self.memory.memory_count(),
            ring_fill_pct: self.memory.ring_fill_pct(),
            last_digest_at: None,
            lag_per_peer: std::collections::HashMap::new(),
        }
    }

    // ---- Agent-facing operations (§6) ----

    pub async fn store_memory(
        &self,
        content: String,
        category: Category,
        tags: HashSet<String>,
        scope: Scope,
        importance: Importance,
        agent_id: String,
    ) -> CollectiveResult<(String, Version)> {
        self.memory.store(content, category, tags, scope, importance, agent_id).await
    }

    pub async fn search_memories(&self, query: &str, filter: SearchFilter, limit: usize, min_confidence: f64) -> CollectiveResult<Vec<MemorySearchHit>> {
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| CollectiveError::unavailable("no semantic index configured", None))?;
        let query_vector = index.embed(query).await?;
        let hits = index.search(&query_vector, filter, limit);
        let mut resolved = Vec::with_capacity(hits.len());
        for hit in hits {
            let memory = match self.memory.get(&hit.vector_ref, false) {
                Ok(memory) => memory,
                Err(_) => continue,
            };
            let confidence = memory.confidence.clone();
            if confidence.score < min_confidence {
                continue;
            }
            resolved.push(MemorySearchHit {
                memory,
                score: hit.score,
                confidence,
            });
        }
        Ok(resolved)
    }

    pub fn retrieve_memory(&self, id: &str) -> CollectiveResult<Memory> {
        self.memory.get(id, false)
    }

    pub async fn update_memory(&self, id: &str, patch: MemoryPatch) -> CollectiveResult<Version> {
        self.memory.update(id, patch).await
    }

    pub async fn delete_memory(&self, id: &str, reason: String, agent_id: String, hard: bool) -> CollectiveResult<()> {
        self.memory.soft_delete(id, reason, agent_id).await?;
        if hard {
            self.memory.purge(id)?;
        }
        Ok(())
    }

    pub async fn recover_memory(&self, id: &str) -> CollectiveResult<Version> {
        self.memory.recover(id).await
    }

    pub fn register_agent(&self, role: impl Into<String>, capabilities: HashSet<String>) -> String {
        self.agents.register(role, capabilities)
    }

    pub fn deregister_agent(&self, agent_id: &str) -> CollectiveResult<()> {
        self.agents.deregister(agent_id)
    }

    pub fn heartbeat(&self, agent_id: &str, status: AgentStatus) -> CollectiveResult<()> {
        self.agents.heartbeat(agent_id, status)
    }

    pub fn roster(&self, filter: Option<&RosterFilter>) -> Vec<Agent> {
        self.agents.roster(filter)
    }

    pub fn route(&self, required_capabilities: &HashSet<String>, affinity: Option<&Affinity>) -> CollectiveResult<String> {
        self.agents.route(required_capabilities, affinity)
    }

    pub async fn delegate_task(&self, requester_agent_id: &str, description: String, capabilities: HashSet<String>, priority: Priority) -> CollectiveResult<Task> {
        self.bus.delegate_task(requester_agent_id, description, capabilities, priority).await
    }

    pub async fn broadcast(&self, agent_id: String, category: Category, severity: types::Severity, message: String) -> Broadcast {
        self.bus.publish_broadcast(agent_id, category, severity, message).await
    }
}

/// Prelude for convenient imports: `use collective_core::prelude::*;`.
pub mod prelude {
    pub use crate::agents::{AgentDirectory, Affinity, RosterFilter};
    pub use crate::bus::CoordinationBus;
    pub use crate::config::Config;
    pub use crate::error::{CollectiveError, CollectiveResult};
    pub use crate::health::HealthReport;
    pub use crate::identity::{LamportClock, MachineId, Version};
    pub use crate::memory::{Change, MemoryPatch, MemoryStore};
    pub use crate::sync::SyncEngine;
    pub use crate::types::*;
    pub use crate::vector::{Embedder, SemanticIndex};
    pub use crate::Collective;
}

/// Initialize the `tracing` subscriber. Call once at process startup.
/// Level is controlled by the `COLLECTIVE_LOG` environment variable
/// (`error`, `warn`, `info`, `debug`, `trace`; default `info`).
pub fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("COLLECTIVE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
