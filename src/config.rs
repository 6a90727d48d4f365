//! Layered configuration: compiled defaults, an optional
//! `collective.yaml`, then `COLLECTIVE_*` environment overrides.
//!
//! Validated eagerly at startup; an invalid file fails fast rather than
//! silently falling back to defaults.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CollectiveError, CollectiveResult};

/// Per-factor weights for the confidence score (§4.2). Must sum to 1.0
/// within a small tolerance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceWeights {
    pub freshness: f64,
    pub source: f64,
    pub verification: f64,
    pub consensus: f64,
    pub no_contradiction: f64,
    pub success_rate: f64,
    pub context_relevance: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        // Equal weight across the seven factors, per §4.2.
        let w = 1.0 / 7.0;
        Self {
            freshness: w,
            source: w,
            verification: w,
            consensus: w,
            no_contradiction: w,
            success_rate: w,
            context_relevance: w,
        }
    }
}

impl ConfidenceWeights {
    fn sum(&self) -> f64 {
        self.freshness
            + self.source
            + self.verification
            + self.consensus
            + self.no_contradiction
            + self.success_rate
            + self.context_relevance
    }

    fn validate(&self) -> CollectiveResult<()> {
        if (self.sum() - 1.0).abs() > 1e-6 {
            return Err(CollectiveError::validation(format!(
                "confidence weights must sum to 1.0, got {}",
                self.sum()
            )));
        }
        Ok(())
    }
}

/// Fully resolved runtime configuration for one `Collective` instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data_dir: PathBuf,
    pub bind_addr: String,
    pub peers: Vec<String>,
    pub join_addr: Option<String>,

    pub retention_window: Duration,
    pub digest_interval: Duration,
    pub heartbeat_interval: Duration,
    pub agent_lease: Duration,
    pub task_ack_timeout: Duration,

    pub memory_write_timeout: Duration,
    pub vector_search_timeout: Duration,
    pub peer_request_timeout: Duration,

    pub confidence_weights: ConfidenceWeights,
    pub change_ring_capacity: usize,
    pub quarantine_failure_threshold: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            bind_addr: "0.0.0.0:7878".to_string(),
            peers: Vec::new(),
            join_addr: None,
            retention_window: Duration::from_secs(30 * 24 * 3600),
            digest_interval: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(5),
            agent_lease: Duration::from_secs(5 * 60),
            task_ack_timeout: Duration::from_secs(30),
            memory_write_timeout: Duration::from_secs(2),
            vector_search_timeout: Duration::from_secs(5),
            peer_request_timeout: Duration::from_secs(10),
            confidence_weights: ConfidenceWeights::default(),
            change_ring_capacity: 4096,
            quarantine_failure_threshold: 10,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("collective")
}

/// On-disk / env representation. Durations are plain seconds so the
/// YAML file and env vars stay human-editable; `Config` holds the
/// typed `Duration`s the rest of the crate consumes.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    data_dir: Option<PathBuf>,
    bind_addr: Option<String>,
    peers: Option<Vec<String>>,
    join_addr: Option<String>,
    retention_window_secs: Option<u64>,
    digest_interval_secs: Option<u64>,
    heartbeat_interval_secs: Option<u64>,
    agent_lease_secs: Option<u64>,
    task_ack_timeout_secs: Option<u64>,
    memory_write_timeout_secs: Option<u64>,
    vector_search_timeout_secs: Option<u64>,
    peer_request_timeout_secs: Option<u64>,
    confidence_weights: Option<ConfidenceWeights>,
    change_ring_capacity: Option<usize>,
    quarantine_failure_threshold: Option<u32>,
}

impl Config {
    /// Resolve configuration from (in increasing precedence): compiled
    /// defaults, `$KORU_COLLECTIVE_HOME/collective.yaml` (or the
    /// platform data dir if unset), then `COLLECTIVE_*` env vars.
    pub fn load() -> CollectiveResult<Self> {
        let mut config = Self::default();

        let config_path = Self::resolve_config_path();
        if config_path.exists() {
            let raw = Self::read_yaml(&config_path)?;
            config.apply_raw(raw);
        }

        config.apply_env(&std::env::vars().collect());
        config.validate()?;
        Ok(config)
    }

    fn resolve_config_path() -> PathBuf {
        if let Ok(home) = std::env::var("KORU_COLLECTIVE_HOME") {
            return PathBuf::from(home).join("collective.yaml");
        }
        default_data_dir().join("collective.yaml")
    }

    fn read_yaml(path: &Path) -> CollectiveResult<RawConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CollectiveError::validation(format!("cannot read {}: {e}", path.display())))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| CollectiveError::validation(format!("invalid config file {}: {e}", path.display())))
    }

    fn apply_raw(&mut self, raw: RawConfig) {
        if let Some(v) = raw.data_dir {
            self.data_dir = v;
        }
        if let Some(v) = raw.bind_addr {
            self.bind_addr = v;
        }
        if let Some(v) = raw.peers {
            self.peers = v;
        }
        if raw.join_addr.is_some() {
            self.join_addr = raw.join_addr;
        }
        if let Some(v) = raw.retention_window_secs {
            self.retention_window = Duration::from_secs(v);
        }
        if let Some(v) = raw.digest_interval_secs {
            self.digest_interval = Duration::from_secs(v);
        }
        if let Some(v) = raw.heartbeat_interval_secs {
            self.heartbeat_interval = Duration::from_secs(v);
        }
        if let Some(v) = raw.agent_lease_secs {
            self.agent_lease = Duration::from_secs(v);
        }
        if let Some(v) = raw.task_ack_timeout_secs {
            self.task_ack_timeout = Duration::from_secs(v);
        }
        if let Some(v) = raw.memory_write_timeout_secs {
            self.memory_write_timeout = Duration::from_secs(v);
        }
        if let Some(v) = raw.vector_search_timeout_secs {
            self.vector_search_timeout = Duration::from_secs(v);
        }
        if let Some(v) = raw.peer_request_timeout_secs {
            self.peer_request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = raw.confidence_weights {
            self.confidence_weights = v;
        }
        if let Some(v) = raw.change_ring_capacity {
            self.change_ring_capacity = v;
        }
        if let Some(v) = raw.quarantine_failure_threshold {
            self.quarantine_failure_threshold = v;
        }
    }

    fn apply_env(&mut self, env: &HashMap<String, String>) {
        if let Some(v) = env.get("COLLECTIVE_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = env.get("COLLECTIVE_BIND_ADDR") {
            self.bind_addr = v.clone();
        }
        if let Some(v) = env.get("COLLECTIVE_PEERS") {
            self.peers = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Some(v) = env.get("COLLECTIVE_JOIN_ADDR") {
            self.join_addr = Some(v.clone());
        }
        if let Some(v) = env.get("COLLECTIVE_RETENTION_WINDOW_SECS").and_then(|v| v.parse().ok()) {
            self.retention_window = Duration::from_secs(v);
        }
        if let Some(v) = env.get("COLLECTIVE_DIGEST_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.digest_interval = Duration::from_secs(v);
        }
        if let Some(v) = env.get("COLLECTIVE_HEARTBEAT_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.heartbeat_interval = Duration::from_secs(v);
        }
        if let Some(v) = env.get("COLLECTIVE_AGENT_LEASE_SECS").and_then(|v| v.parse().ok()) {
            self.agent_lease = Duration::from_secs(v);
        }
        if let Some(v) = env.get("COLLECTIVE_TASK_ACK_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.task_ack_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env.get("COLLECTIVE_CHANGE_RING_CAPACITY").and_then(|v| v.parse().ok()) {
            self.change_ring_capacity = v;
        }
        if let Some(v) = env.get("COLLECTIVE_QUARANTINE_FAILURE_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.quarantine_failure_threshold = v;
        }
    }

    fn validate(&self) -> CollectiveResult<()> {
        self.confidence_weights.validate()?;
        if self.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(CollectiveError::validation(format!(
                "bind_addr '{}' is not a valid socket address",
                self.bind_addr
            )));
        }
        if self.change_ring_capacity == 0 {
            return Err(CollectiveError::validation("change_ring_capacity must be > 0"));
        }
        Ok(())
    }
}
