//! Identity & Clock (I): machine identity and the logical clock used to
//! order writes across the fleet.
//!
//! This is the only component with no dependencies on the others; it is
//! constructed first during startup and handed by reference to every
//! other component that needs to stamp a [`Version`] or mint an id.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{CollectiveError, CollectiveResult};

/// Stable identifier for this machine, persisted once per data directory
/// so restarts keep the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MachineId(pub String);

impl MachineId {
    /// Generate a fresh machine id (a ULID, so it sorts with creation order).
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Load the machine id from `path`, creating and persisting a new one
    /// if the file does not yet exist.
    pub fn load_or_create(path: &std::path::Path) -> CollectiveResult<Self> {
        if let Ok(existing) = std::fs::read_to_string(path) {
            let trimmed = existing.trim();
            if !trimmed.is_empty() {
                return Ok(Self(trimmed.to_string()));
            }
        }
        let fresh = Self::generate();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CollectiveError::internal(format!("failed to create data dir: {e}"))
            })?;
        }
        std::fs::write(path, &fresh.0)
            .map_err(|e| CollectiveError::internal(format!("failed to persist machine id: {e}")))?;
        Ok(fresh)
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A Lamport version: a monotonically increasing counter paired with the
/// machine that produced it. Versions from the same machine compare by
/// counter; versions from different machines are ordered by counter and
/// then broken by `machine_id` for a total order without coordination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub counter: u64,
    pub machine_id: MachineId,
}

impl Version {
    pub fn new(counter: u64, machine_id: MachineId) -> Self {
        Self { counter, machine_id }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.machine_id.0.cmp(&other.machine_id.0))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.counter, self.machine_id)
    }
}

/// A Lamport logical clock local to this machine.
///
/// `next()` advances the clock for a local write. `observe(remote)`
/// folds in a counter seen from a peer so future local versions sort
/// after anything the fleet has already witnessed.
#[derive(Debug)]
pub struct LamportClock {
    machine_id: MachineId,
    counter: AtomicU64,
}

impl LamportClock {
    pub fn new(machine_id: MachineId) -> Self {
        Self {
            machine_id,
            counter: AtomicU64::new(0),
        }
    }

    pub fn machine_id(&self) -> &MachineId {
        &self.machine_id
    }

    /// Advance the clock and return a fresh version stamped with this
    /// machine's id.
    pub fn next(&self) -> Version {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Version::new(counter, self.machine_id.clone())
    }

    /// Fold a counter observed from a remote version into the local
    /// clock so the next locally-minted version dominates it.
    pub fn observe(&self, remote_counter: u64) {
        self.counter
            .fetch_max(remote_counter, Ordering::SeqCst);
    }

    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

/// Generate a lexicographically-sortable id for agents, memories and
/// tasks. ULIDs embed a millisecond timestamp so ids sort by creation
/// order even across machines with loosely synchronized clocks.
pub fn new_id() -> String {
    ulid::Ulid::new().to_string()
}
