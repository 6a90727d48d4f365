//! Shared data model: the entities that flow between Memory Store,
//! Semantic Index, Sync Engine, Agent Registry & Router, and the
//! Coordination Bus.
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::identity::{new_id, MachineId, Version};

/// Closed set of categories a memory can be filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Global,
    Project,
    Conversation,
    Agent,
    Infrastructure,
    Incidents,
    Deployments,
    Monitoring,
    Runbooks,
    Security,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Project => "project",
            Self::Conversation => "conversation",
            Self::Agent => "agent",
            Self::Infrastructure => "infrastructure",
            Self::Incidents => "incidents",
            Self::Deployments => "deployments",
            Self::Monitoring => "monitoring",
            Self::Runbooks => "runbooks",
            Self::Security => "security",
        }
    }

    /// Half-life (in days) used by the freshness confidence factor.
    /// Categories not called out explicitly default to 30 days.
    pub fn freshness_half_life_days(&self) -> f64 {
        match self {
            Self::Incidents => 14.0,
            Self::Runbooks => 180.0,
            _ => 30.0,
        }
    }
}

impl std::str::FromStr for Category {
    type Err = crate::error::CollectiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Self::Global),
            "project" => Ok(Self::Project),
            "conversation" => Ok(Self::Conversation),
            "agent" => Ok(Self::Agent),
            "infrastructure" => Ok(Self::Infrastructure),
            "incidents" => Ok(Self::Incidents),
            "deployments" => Ok(Self::Deployments),
            "monitoring" => Ok(Self::Monitoring),
            "runbooks" => Ok(Self::Runbooks),
            "security" => Ok(Self::Security),
            other => Err(crate::error::CollectiveError::validation(format!(
                "unknown category '{other}'"
            ))),
        }
    }
}

/// Whether a memory may cross the wire to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Collective,
    MachineLocal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Normal,
    High,
}

/// Lifecycle state of a memory. Transitions are monotone:
/// `Active -> SoftDeleted -> Purged`, with `recover()` lifting
/// `SoftDeleted` back to `Active` (a distinct transition, not a rewind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryState {
    Active,
    SoftDeleted,
    Purged,
}

/// Where and by whom a memory was first created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Origin {
    pub machine_id: MachineId,
    pub agent_id: String,
    pub created_at_wall: i64,
}

/// A losing write preserved so no contributed text is silently lost when
/// a conflicting write wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowEntry {
    pub content: String,
    pub version: Version,
    pub recorded_at: i64,
}

/// The unit of stored knowledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub content: String,
    pub category: Category,
    pub tags: HashSet<String>,
    pub scope: Scope,
    pub importance: Importance,
    pub origin: Origin,
    pub version: Version,
    pub vector_ref: Option<String>,
    pub confidence: ConfidenceSnapshot,
    pub state: MemoryState,
    pub deleted_at: Option<i64>,
    pub delete_reason: Option<String>,
    pub deleted_by: Option<String>,
    pub shadow_history: Vec<ShadowEntry>,
    pub extensions: serde_json::Map<String, serde_json::Value>,
}

impl Memory {
    /// Build the `{machine_id}:{ulid}` id used for a freshly stored memory.
    pub fn new_id(machine_id: &MachineId) -> String {
        format!("{}:{}", machine_id.as_str(), new_id())
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, MemoryState::Active)
    }
}

/// Cached confidence factors and the score/level derived from them.
/// Recomputed lazily on read; any write invalidates `computed_at`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfidenceSnapshot {
    pub score: f64,
    pub level: ConfidenceLevel,
    pub computed_at: i64,
}

impl Default for ConfidenceSnapshot {
    fn default() -> Self {
        Self {
            score: 0.0,
            level: ConfidenceLevel::VeryLow,
            computed_at: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    VeryHigh,
    High,
    Medium,
    Low,
    VeryLow,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.85 {
            Self::VeryHigh
        } else if score >= 0.70 {
            Self::High
        } else if score >= 0.55 {
            Self::Medium
        } else if score >= 0.40 {
            Self::Low
        } else {
            Self::VeryLow
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Offline,
}

/// A registered agent on some machine in the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub machine_id: MachineId,
    pub role: String,
    pub capabilities: HashSet<String>,
    pub last_seen: i64,
    pub status: AgentStatus,
    /// Wall-clock deadline after which the lease is considered expired
    /// absent a renewing heartbeat.
    pub lease_expires_at: i64,
}

impl Agent {
    pub fn has_capabilities(&self, required: &HashSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Assigned,
    InProgress,
    Done,
    Failed,
    Expired,
    Cancelled,
}

/// A directed task delegation routed through the Agent Registry & Router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub description: String,
    pub required_capabilities: HashSet<String>,
    pub priority: Priority,
    pub state: TaskState,
    pub assignee_agent_id: Option<String>,
    pub created_at: i64,
    pub deadline: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// An ephemeral, fleet-wide announcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broadcast {
    pub id: String,
    pub category: Category,
    pub severity: Severity,
    pub message: String,
    pub origin: Origin,
    pub created_at: i64,
}
