//! Memory Store (M): authoritative local persistence of memories and
//! tombstones. Enforces the lifecycle and conflict invariants of §4.1
//! and emits change events for the Sync Engine to fan out.
pub mod confidence;
pub mod duplicates;
pub mod persistence;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::ConfidenceWeights;
use crate::error::{CollectiveError, CollectiveResult};
use crate::identity::{LamportClock, MachineId, Version};
use crate::types::{
    Category, ConfidenceSnapshot, Importance, Memory, MemoryState, Origin, Scope, ShadowEntry,
};
use crate::vector::SemanticIndex;

use confidence::ConfidenceFactors;
use duplicates::{find_duplicates as cluster_duplicates, pick_keeper, KeepPolicy};
use persistence::Wal;

/// A tombstone left behind by a final purge. Retained indefinitely
/// (pending an operator-driven GC past cluster quiescence).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: String,
    pub version: Version,
    pub deleted_at: i64,
}

/// A mutation M just committed, handed to Y for replication.
#[derive(Debug, Clone)]
pub struct Change {
    pub kind: ChangeKind,
    pub memory: Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
    Recover,
}

/// Allowed fields in an `update()` patch; anything else is rejected.
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    pub content: Option<String>,
    pub tags: Option<HashSet<String>>,
    pub importance: Option<Importance>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The Memory Store component.
pub struct MemoryStore {
    machine_id: MachineId,
    clock: Arc<LamportClock>,
    index: Option<Arc<SemanticIndex>>,
    current: DashMap<String, Memory>,
    tombstones: DashMap<String, Tombstone>,
    memories_wal: Mutex<Wal<Memory>>,
    tombstones_wal: Mutex<Wal<Tombstone>>,
    change_tx: mpsc::Sender<Change>,
    confidence_weights: ConfidenceWeights,
    retention_window: Duration,
    ring_near_full_writes: AtomicU32,
}

impl MemoryStore {
    /// Open (or create) the store at `data_dir`, replaying its logs.
    /// Returns the store and the receiving half of the change ring for
    /// Y to drain.
    pub fn open(
        data_dir: &std::path::Path,
        machine_id: MachineId,
        clock: Arc<LamportClock>,
        index: Option<Arc<SemanticIndex>>,
        confidence_weights: ConfidenceWeights,
        retention_window: Duration,
        change_ring_capacity: usize,
    ) -> CollectiveResult<(Self, mpsc::Receiver<Change>)> {
        let memories_path = data_dir.join("memories.log");
        let tombstones_path = data_dir.join("tombstones.log");

        let memories_wal: Wal<Memory> = Wal::open(&memories_path)?;
        let tombstones_wal: Wal<Tombstone> = Wal::open(&tombstones_path)?;

        let current = DashMap::new();
        for memory in Wal::replay(&memories_path)? {
            // Later records for the same id win; replay is in append order.
            current.insert(memory.id.clone(), memory);
        }

        let tombstones = DashMap::new();
        for tombstone in Wal::replay(&tombstones_path)? {
            current.remove(&tombstone.id);
            tombstones.insert(tombstone.id.clone(), tombstone);
        }

        info!(count = current.len(), "replayed memory store from log");

        let (change_tx, change_rx) = mpsc::channel(change_ring_capacity.max(1));

        let store = Self {
            machine_id,
            clock,
            index,
            current,
            tombstones,
            memories_wal: Mutex::new(memories_wal),
            tombstones_wal: Mutex::new(tombstones_wal),
            change_tx,
            confidence_weights,
            retention_window,
            ring_near_full_writes: AtomicU32::new(0),
        };

        Ok((store, change_rx))
    }

    /// `store()` of §4.1: assign id and version, persist, emit `Create`.
    #[allow(clippy::too_many_arguments)]
    pub async fn store(
        &self,
        content: String,
        category: Category,
        tags: HashSet<String>,
        scope: Scope,
        importance: Importance,
        agent_id: String,
    ) -> CollectiveResult<(String, Version)> {
        let id = Memory::new_id(&self.machine_id);
        let version = self.clock.next();

        let vector_ref = if let Some(index) = &self.index {
            let vector = index.embed(&content).await?;
            let vector_ref = id.clone();
            index.upsert(
                vector_ref.clone(),
                vector,
                crate::vector::VectorMetadata {
                    category,
                    scope,
                    machine_id: self.machine_id.as_str().to_string(),
                    tags: tags.iter().cloned().collect(),
                    created_at: now_ms(),
                },
            );
            Some(vector_ref)
        } else {
            None
        };

        let memory = Memory {
            id: id.clone(),
            content,
            category,
            tags,
            scope,
            importance,
            origin: Origin {
                machine_id: self.machine_id.clone(),
                agent_id,
                created_at_wall: now_ms(),
            },
            version: version.clone(),
            vector_ref,
            confidence: ConfidenceSnapshot::default(),
            state: MemoryState::Active,
            deleted_at: None,
            delete_reason: None,
            deleted_by: None,
            shadow_history: Vec::new(),
            extensions: serde_json::Map::new(),
        };

        self.persist(&memory)?;
        self.current.insert(id.clone(), memory.clone());
        self.emit(ChangeKind::Create, memory).await;

        Ok((id, version))
    }

    /// `update()` of §4.1: merge `patch`, bump version, re-embed if
    /// content changed, emit `Update`.
    pub async fn update(&self, id: &str, patch: MemoryPatch) -> CollectiveResult<Version> {
        let mut memory = self
            .current
            .get(id)
            .map(|m| m.clone())
            .ok_or_else(|| CollectiveError::not_found("memory", id))?;

        if !memory.is_active() {
            return Err(CollectiveError::conflict(id, "memory is not active"));
        }

        let content_changed = patch.content.is_some();
        if let Some(content) = patch.content {
            memory.content = content;
        }
        if let Some(tags) = patch.tags {
            memory.tags = tags;
        }
        if let Some(importance) = patch.importance {
            memory.importance = importance;
        }
        memory.version = self.clock.next();

        if content_changed {
            if let Some(index) = &self.index {
                let vector = index.embed(&memory.content).await?;
                let vector_ref = memory.vector_ref.clone().unwrap_or_else(|| memory.id.clone());
                index.upsert(
                    vector_ref.clone(),
                    vector,
                    crate::vector::VectorMetadata {
                        category: memory.category,
                        scope: memory.scope,
                        machine_id: self.machine_id.as_str().to_string(),
                        tags: memory.tags.iter().cloned().collect(),
                        created_at: memory.origin.created_at_wall,
                    },
                );
                memory.vector_ref = Some(vector_ref);
            }
        }

        self.persist(&memory)?;
        let version = memory.version.clone();
        self.current.insert(id.to_string(), memory.clone());
        self.emit(ChangeKind::Update, memory).await;
        Ok(version)
    }

    /// `soft_delete()` of §4.1. Removes the S entry but keeps
    /// `vector_ref` so `recover()` can re-add it.
    pub async fn soft_delete(&self, id: &str, reason: String, actor: String) -> CollectiveResult<Version> {
        let mut memory = self
            .current
            .get(id)
            .map(|m| m.clone())
            .ok_or_else(|| CollectiveError::not_found("memory", id))?;

        if memory.state == MemoryState::Purged {
            return Err(CollectiveError::conflict(id, "memory already purged"));
        }

        memory.state = MemoryState::SoftDeleted;
        memory.deleted_at = Some(now_ms());
        memory.delete_reason = Some(reason);
        memory.deleted_by = Some(actor);
        memory.version = self.clock.next();

        if let (Some(index), Some(vector_ref)) = (&self.index, &memory.vector_ref) {
            index.remove(vector_ref);
        }

        self.persist(&memory)?;
        let version = memory.version.clone();
        self.current.insert(id.to_string(), memory.clone());
        self.emit(ChangeKind::Delete, memory).await;
        Ok(version)
    }

    /// `recover()` of §4.1. Legal only while soft-deleted and within
    /// the retention window; bumps version and re-adds to S.
    pub async fn recover(&self, id: &str) -> CollectiveResult<Version> {
        let mut memory = self
            .current
            .get(id)
            .map(|m| m.clone())
            .ok_or_else(|| CollectiveError::not_found("memory", id))?;

        if memory.state != MemoryState::SoftDeleted {
            return Err(CollectiveError::conflict(id, "memory is not soft-deleted"));
        }
        let deleted_at = memory.deleted_at.unwrap_or(0);
        if now_ms() - deleted_at > self.retention_window.as_millis() as i64 {
            return Err(CollectiveError::policy("retention window elapsed; not recoverable"));
        }

        memory.state = MemoryState::Active;
        memory.deleted_at = None;
        memory.delete_reason = None;
        memory.deleted_by = None;
        memory.version = self.clock.next();

        if let Some(index) = &self.index {
            let vector = index.embed(&memory.content).await?;
            let vector_ref = memory.vector_ref.clone().unwrap_or_else(|| memory.id.clone());
            index.upsert(
                vector_ref.clone(),
                vector,
                crate::vector::VectorMetadata {
                    category: memory.category,
                    scope: memory.scope,
                    machine_id: self.machine_id.as_str().to_string(),
                    tags: memory.tags.iter().cloned().collect(),
                    created_at: memory.origin.created_at_wall,
                },
            );
            memory.vector_ref = Some(vector_ref);
        }

        self.persist(&memory)?;
        let version = memory.version.clone();
        self.current.insert(id.to_string(), memory.clone());
        self.emit(ChangeKind::Recover, memory).await;
        Ok(version)
    }

    /// `purge()` of §4.1: final, replaces the record with a tombstone.
    /// Requesting before the retention window elapses is rejected.
    pub fn purge(&self, id: &str) -> CollectiveResult<()> {
        let memory = self
            .current
            .get(id)
            .map(|m| m.clone())
            .ok_or_else(|| CollectiveError::not_found("memory", id))?;

        if memory.state != MemoryState::SoftDeleted {
            return Err(CollectiveError::conflict(id, "only soft-deleted memories can be purged"));
        }
        let deleted_at = memory.deleted_at.unwrap_or(0);
        if now_ms() - deleted_at < self.retention_window.as_millis() as i64 {
            return Err(CollectiveError::policy("retention window has not elapsed"));
        }

        if let Some(index) = &self.index {
            if let Some(vector_ref) = &memory.vector_ref {
                index.remove(vector_ref);
            }
        }

        let tombstone = Tombstone {
            id: id.to_string(),
            version: memory.version.clone(),
            deleted_at: now_ms(),
        };
        self.tombstones_wal.lock().append(&tombstone)?;
        self.tombstones.insert(id.to_string(), tombstone);
        self.current.remove(id);
        Ok(())
    }

    /// `get()` of §4.1, with confidence recomputed lazily rather than
    /// trusting whatever snapshot was last persisted.
    pub fn get(&self, id: &str, include_deleted: bool) -> CollectiveResult<Memory> {
        let mut memory = self
            .current
            .get(id)
            .map(|m| m.clone())
            .ok_or_else(|| CollectiveError::not_found("memory", id))?;
        if !include_deleted && !memory.is_active() {
            return Err(CollectiveError::not_found("memory", id));
        }
        memory.confidence = self.recompute_confidence(&memory);
        Ok(memory)
    }

    /// Recompute a memory's confidence snapshot from its current age
    /// and shadow history. Factors this store has no signal for yet
    /// (verification, consensus, success rate, context relevance) use
    /// a neutral midpoint rather than skewing the score in either
    /// direction; A and C populate richer signals as they mature.
    fn recompute_confidence(&self, memory: &Memory) -> ConfidenceSnapshot {
        let now = now_ms();
        let age_days = ((now - memory.origin.created_at_wall).max(0) as f64) / 86_400_000.0;
        let factors = ConfidenceFactors {
            freshness: ConfidenceFactors::freshness_from_age(age_days, memory.category),
            source: 0.5,
            verification: 0.5,
            consensus: if memory.shadow_history.is_empty() { 1.0 } else { 0.5 },
            no_contradiction: if memory.shadow_history.is_empty() { 1.0 } else { 0.5 },
            success_rate: 0.5,
            context_relevance: 0.5,
        };
        confidence::score(&factors, &self.confidence_weights, now)
    }

    /// Active memory count, for the health endpoint (§6).
    pub fn memory_count(&self) -> usize {
        self.current.iter().filter(|m| m.is_active()).count()
    }

    /// Fraction of the change ring currently occupied, for the health
    /// endpoint's `ring_fill_pct` (§6).
    pub fn ring_fill_pct(&self) -> f32 {
        let max = self.change_tx.max_capacity();
        if max == 0 {
            return 0.0;
        }
        1.0 - (self.change_tx.capacity() as f32 / max as f32)
    }

    /// `list_recent()` of §4.1: finite, newest-first.
    pub fn list_recent(&self, category: Option<Category>, since_ms: i64) -> Vec<Memory> {
        let mut memories: Vec<Memory> = self
            .current
            .iter()
            .filter(|m| m.is_active())
            .filter(|m| m.origin.created_at_wall >= since_ms)
            .filter(|m| category.map(|c| c == m.category).unwrap_or(true))
            .map(|m| {
                let mut memory = m.clone();
                memory.confidence = self.recompute_confidence(&memory);
                memory
            })
            .collect();
        memories.sort_by(|a, b| b.origin.created_at_wall.cmp(&a.origin.created_at_wall));
        memories
    }

    /// Apply a `Change` received from a peer. Idempotent on `id`:
    /// discards if the incoming version is <= local; folds the remote
    /// counter into the local clock either way so future local
    /// versions dominate anything the fleet has already witnessed.
    pub fn apply_remote(&self, change: Change) -> CollectiveResult<()> {
        self.clock.observe(change.memory.version.counter);

        if change.memory.scope == Scope::MachineLocal {
            return Err(CollectiveError::policy("machine-local memory must not cross the wire"));
        }

        let incoming = change.memory;
        match self.current.get(&incoming.id).map(|m| m.clone()) {
            Some(existing) if existing.version == incoming.version => {
                // Same id, same (counter, machine_id): a duplicate
                // delivery of a change already applied (reconnect or
                // digest re-send). A pure no-op keeps replication
                // idempotent per §4.4 step 3.
                return Ok(());
            }
            Some(existing) if existing.version > incoming.version => {
                // Local write already dominates; keep it, but preserve
                // the loser's content so no contribution is lost. The
                // loser may itself be a repeated stale delivery, so
                // dedupe by version before recording another entry.
                let mut winner = existing;
                let already_recorded = winner.shadow_history.iter().any(|e| e.version == incoming.version);
                if !already_recorded {
                    winner.shadow_history.push(ShadowEntry {
                        content: incoming.content,
                        version: incoming.version,
                        recorded_at: now_ms(),
                    });
                    self.persist(&winner)?;
                    self.current.insert(winner.id.clone(), winner);
                }
            }
            Some(mut existing) => {
                existing.shadow_history.push(ShadowEntry {
                    content: existing.content.clone(),
                    version: existing.version.clone(),
                    recorded_at: now_ms(),
                });
                let mut incoming = incoming;
                incoming.shadow_history.append(&mut existing.shadow_history);
                self.persist(&incoming)?;
                self.current.insert(incoming.id.clone(), incoming);
            }
            None => {
                self.persist(&incoming)?;
                self.current.insert(incoming.id.clone(), incoming);
            }
        }
        Ok(())
    }

    /// `find_duplicates()` of §4.1: clusters of ids whose S similarity
    /// is at least `threshold`. Re-embeds each active memory's content
    /// rather than reading back the index's internal vectors, since S
    /// only exposes embed/upsert/remove/search (§4.3).
    pub async fn find_duplicates(&self, threshold: f32) -> CollectiveResult<Vec<Vec<String>>> {
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| CollectiveError::unavailable("no semantic index configured", None))?;

        let active: Vec<(String, String)> = self
            .current
            .iter()
            .filter(|m| m.is_active())
            .map(|m| (m.id.clone(), m.content.clone()))
            .collect();

        let mut candidates = Vec::with_capacity(active.len());
        for (id, content) in active {
            let vector = index.embed(&content).await?;
            candidates.push((id, vector));
        }

        Ok(cluster_duplicates(&candidates, threshold))
    }

    /// `merge()` of §4.1: create a merged memory carrying a
    /// `merge_record` back to both originals, then soft-delete every
    /// member (including the keeper) so no duplicate is left active.
    pub async fn merge(&self, members: &[String], policy: KeepPolicy) -> CollectiveResult<String> {
        if members.len() < 2 {
            return Err(CollectiveError::validation("merge requires at least two members"));
        }
        let memories: Vec<Memory> = members
            .iter()
            .map(|id| self.get(id, false))
            .collect::<CollectiveResult<Vec<_>>>()?;

        let created_at: Vec<i64> = memories.iter().map(|m| m.origin.created_at_wall).collect();
        let content_len: Vec<usize> = memories.iter().map(|m| m.content.len()).collect();
        let keeper_idx = pick_keeper(policy, &created_at, &content_len, None);
        let keeper = &memories[keeper_idx];

        let (merged_id, _version) = self
            .store(
                keeper.content.clone(),
                keeper.category,
                keeper.tags.clone(),
                keeper.scope,
                keeper.importance,
                keeper.origin.agent_id.clone(),
            )
            .await?;

        let mut merged = self
            .current
            .get(&merged_id)
            .map(|m| m.clone())
            .ok_or_else(|| CollectiveError::not_found("memory", &merged_id))?;
        merged.extensions.insert(
            "merge_record".to_string(),
            serde_json::json!({ "merged_from": members }),
        );
        merged.version = self.clock.next();
        self.persist(&merged)?;
        self.current.insert(merged_id.clone(), merged.clone());
        self.emit(ChangeKind::Update, merged).await;

        for memory in &memories {
            self.soft_delete(&memory.id, format!("merged into {merged_id}"), "memory-store".to_string())
                .await?;
        }

        Ok(merged_id)
    }

    fn persist(&self, memory: &Memory) -> CollectiveResult<()> {
        self.memories_wal.lock().append(memory)
    }

    async fn emit(&self, kind: ChangeKind, memory: Memory) {
        let capacity = self.change_tx.capacity();
        let max_capacity = self.change_tx.max_capacity();
        if max_capacity > 0 && capacity * 10 < max_capacity {
            // Ring >= 90% full: apply brief write backpressure (§4.1)
            // rather than blocking indefinitely on a stalled Y.
            let prev = self.ring_near_full_writes.fetch_add(1, AtomicOrdering::Relaxed);
            if prev == 0 {
                warn!("memory change ring above 90% full; applying brief write backpressure");
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        } else {
            self.ring_near_full_writes.store(0, AtomicOrdering::Relaxed);
        }

        if self.change_tx.send(Change { kind, memory }).await.is_err() {
            warn!("change ring receiver dropped; sync engine is not draining changes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MachineId;

    fn test_store() -> (MemoryStore, mpsc::Receiver<Change>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let machine_id = MachineId("m1".into());
        let clock = Arc::new(LamportClock::new(machine_id.clone()));
        let (store, rx) = MemoryStore::open(
            dir.path(),
            machine_id,
            clock,
            None,
            ConfidenceWeights::default(),
            Duration::from_secs(30 * 24 * 3600),
            64,
        )
        .unwrap();
        (store, rx, dir)
    }

    #[tokio::test]
    async fn store_then_get_round_trips() {
        let (store, _rx, _dir) = test_store();
        let (id, _version) = store
            .store(
                "db timeout".into(),
                Category::Incidents,
                HashSet::new(),
                Scope::Collective,
                Importance::Normal,
                "agent-1".into(),
            )
            .await
            .unwrap();

        let memory = store.get(&id, false).unwrap();
        assert_eq!(memory.content, "db timeout");
        assert!(memory.is_active());
    }

    #[tokio::test]
    async fn update_bumps_version_and_changes_content() {
        let (store, _rx, _dir) = test_store();
        let (id, v1) = store
            .store(
                "draft".into(),
                Category::Global,
                HashSet::new(),
                Scope::Collective,
                Importance::Normal,
                "agent-1".into(),
            )
            .await
            .unwrap();

        let v2 = store
            .update(
                &id,
                MemoryPatch {
                    content: Some("final".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(v2 > v1);
        assert_eq!(store.get(&id, false).unwrap().content, "final");
    }

    #[tokio::test]
    async fn soft_delete_then_recover_restores_active_state() {
        let (store, _rx, _dir) = test_store();
        let (id, _) = store
            .store(
                "content".into(),
                Category::Global,
                HashSet::new(),
                Scope::Collective,
                Importance::Normal,
                "agent-1".into(),
            )
            .await
            .unwrap();

        store.soft_delete(&id, "test".into(), "operator".into()).await.unwrap();
        assert!(store.get(&id, false).is_err());
        assert_eq!(store.get(&id, true).unwrap().state, MemoryState::SoftDeleted);

        store.recover(&id).await.unwrap();
        assert!(store.get(&id, false).unwrap().is_active());
    }

    #[tokio::test]
    async fn purge_before_retention_window_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let machine_id = MachineId("m1".into());
        let clock = Arc::new(LamportClock::new(machine_id.clone()));
        let (store, _rx) = MemoryStore::open(
            dir.path(),
            machine_id,
            clock,
            None,
            ConfidenceWeights::default(),
            Duration::from_secs(3600),
            64,
        )
        .unwrap();

        let (id, _) = store
            .store(
                "content".into(),
                Category::Global,
                HashSet::new(),
                Scope::Collective,
                Importance::Normal,
                "agent-1".into(),
            )
            .await
            .unwrap();
        store.soft_delete(&id, "test".into(), "operator".into()).await.unwrap();

        assert!(store.purge(&id).is_err());
    }

    #[tokio::test]
    async fn apply_remote_with_dominating_version_wins() {
        let (store, _rx, _dir) = test_store();
        let (id, _) = store
            .store(
                "local".into(),
                Category::Global,
                HashSet::new(),
                Scope::Collective,
                Importance::Normal,
                "agent-1".into(),
            )
            .await
            .unwrap();

        let local = store.get(&id, false).unwrap();
        let mut remote = local.clone();
        remote.content = "remote wins".into();
        remote.version = Version::new(local.version.counter + 1, MachineId("m2".into()));

        store.apply_remote(Change { kind: ChangeKind::Update, memory: remote }).unwrap();

        let updated = store.get(&id, false).unwrap();
        assert_eq!(updated.content, "remote wins");
        assert_eq!(updated.shadow_history.len(), 1);
        assert_eq!(updated.shadow_history[0].content, "local");
    }

    #[tokio::test]
    async fn apply_remote_with_losing_version_keeps_local_but_records_shadow() {
        let (store, _rx, _dir) = test_store();
        let (id, _) = store
            .store(
                "local".into(),
                Category::Global,
                HashSet::new(),
                Scope::Collective,
                Importance::Normal,
                "agent-1".into(),
            )
            .await
            .unwrap();
        // Bump local version ahead via an update so it dominates.
        store
            .update(
                &id,
                MemoryPatch {
                    content: Some("local updated".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let local = store.get(&id, false).unwrap();
        let mut remote = local.clone();
        remote.content = "stale remote".into();
        remote.version = Version::new(1, MachineId("m0".into()));

        store.apply_remote(Change { kind: ChangeKind::Update, memory: remote }).unwrap();

        let after = store.get(&id, false).unwrap();
        assert_eq!(after.content, "local updated");
        assert_eq!(after.shadow_history.len(), 1);
        assert_eq!(after.shadow_history[0].content, "stale remote");
    }

    #[tokio::test]
    async fn machine_local_memory_is_rejected_from_remote_apply() {
        let (store, _rx, _dir) = test_store();
        let memory = Memory {
            id: "m2:abc".into(),
            content: "local-only".into(),
            category: Category::Global,
            tags: HashSet::new(),
            scope: Scope::MachineLocal,
            importance: Importance::Normal,
            origin: Origin {
                machine_id: MachineId("m2".into()),
                agent_id: "a".into(),
                created_at_wall: 0,
            },
            version: Version::new(1, MachineId("m2".into())),
            vector_ref: None,
            confidence: ConfidenceSnapshot::default(),
            state: MemoryState::Active,
            deleted_at: None,
            delete_reason: None,
            deleted_by: None,
            shadow_history: Vec::new(),
            extensions: serde_json::Map::new(),
        };
        let result = store.apply_remote(Change { kind: ChangeKind::Create, memory });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn replay_rebuilds_state_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let machine_id = MachineId("m1".into());
        let id;
        {
            let clock = Arc::new(LamportClock::new(machine_id.clone()));
            let (store, _rx) = MemoryStore::open(
                dir.path(),
                machine_id.clone(),
                clock,
                None,
                ConfidenceWeights::default(),
                Duration::from_secs(30 * 24 * 3600),
                64,
            )
            .unwrap();
            let (new_id, _) = store
                .store(
                    "persisted".into(),
                    Category::Global,
                    HashSet::new(),
                    Scope::Collective,
                    Importance::Normal,
                    "agent-1".into(),
                )
                .await
                .unwrap();
            id = new_id;
        }

        let clock = Arc::new(LamportClock::new(machine_id.clone()));
        let (reopened, _rx) = MemoryStore::open(
            dir.path(),
            machine_id,
            clock,
            None,
            ConfidenceWeights::default(),
            Duration::from_secs(30 * 24 * 3600),
            64,
        )
        .unwrap();

        assert_eq!(reopened.get(&id, false).unwrap().content, "persisted");
    }
}
