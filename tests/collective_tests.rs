//! End-to-end tests driving a `Collective` the way an embedding agent
//! would: store/search/delete memories, register and route to agents,
//! delegate tasks, and publish broadcasts.
use std::collections::HashSet;
use std::sync::Arc;

use tempfile::TempDir;

use collective_core::prelude::*;
use collective_core::vector::{NullEmbedder, SearchFilter};

async fn start_collective() -> (TempDir, Arc<Collective>) {
    let dir = TempDir::new().unwrap();
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        bind_addr: "127.0.0.1:0".to_string(),
        ..Config::default()
    };
    let embedder = Arc::new(NullEmbedder {
        dimensions: 16,
        model: "test-model".to_string(),
    });
    let collective = Collective::start(config, Some(embedder)).await.unwrap();
    (dir, collective)
}

#[tokio::test]
async fn store_then_retrieve_round_trips() {
    let (_dir, collective) = start_collective().await;

    let (id, _version) = collective
        .store_memory(
            "the build pipeline uses cargo nextest".to_string(),
            Category::Infrastructure,
            HashSet::new(),
            Scope::Collective,
            Importance::Normal,
            "agent-1".to_string(),
        )
        .await
        .unwrap();

    let memory = collective.retrieve_memory(&id).unwrap();
    assert_eq!(memory.content, "the build pipeline uses cargo nextest");

    collective.stop().await;
}

#[tokio::test]
async fn search_finds_a_stored_memory() {
    let (_dir, collective) = start_collective().await;

    collective
        .store_memory(
            "the deploy runbook lives in runbooks/deploy.md".to_string(),
            Category::Runbooks,
            HashSet::new(),
            Scope::Collective,
            Importance::Normal,
            "agent-1".to_string(),
        )
        .await
        .unwrap();

    let hits = collective
        .search_memories("deploy runbook", SearchFilter::new(), 5, 0.0)
        .await
        .unwrap();
    assert!(!hits.is_empty());

    collective.stop().await;
}

#[tokio::test]
async fn delete_then_recover_restores_the_memory() {
    let (_dir, collective) = start_collective().await;

    let (id, _version) = collective
        .store_memory(
            "temporary scratch note".to_string(),
            Category::Agent,
            HashSet::new(),
            Scope::MachineLocal,
            Importance::Normal,
            "agent-1".to_string(),
        )
        .await
        .unwrap();

    collective
        .delete_memory(&id, "no longer needed".to_string(), "agent-1".to_string(), false)
        .await
        .unwrap();
    assert!(collective.retrieve_memory(&id).is_err());

    collective.recover_memory(&id).await.unwrap();
    let memory = collective.retrieve_memory(&id).unwrap();
    assert_eq!(memory.content, "temporary scratch note");

    collective.stop().await;
}

#[tokio::test]
async fn register_agent_and_route_to_it() {
    let (_dir, collective) = start_collective().await;

    let mut capabilities = HashSet::new();
    capabilities.insert("deploy".to_string());
    let agent_id = collective.register_agent("deployer", capabilities.clone());

    let roster = collective.roster(None);
    assert!(roster.iter().any(|a| a.agent_id == agent_id));

    let routed = collective.route(&capabilities, None).unwrap();
    assert_eq!(routed, agent_id);

    collective.stop().await;
}

#[tokio::test]
async fn delegate_task_to_local_agent_acknowledges_immediately() {
    let (_dir, collective) = start_collective().await;

    let mut capabilities = HashSet::new();
    capabilities.insert("triage".to_string());
    let requester = collective.register_agent("requester", HashSet::new());
    collective.register_agent("triager", capabilities.clone());

    let task = collective
        .delegate_task(&requester, "triage an alert".to_string(), capabilities, Priority::High)
        .await
        .unwrap();

    assert_eq!(task.state, TaskState::InProgress);
    assert!(task.assignee_agent_id.is_some());

    collective.stop().await;
}

#[tokio::test]
async fn broadcast_reaches_no_peers_without_failing() {
    let (_dir, collective) = start_collective().await;

    let agent_id = collective.register_agent("watcher", HashSet::new());
    let broadcast = collective
        .broadcast(agent_id, Category::Incidents, Severity::Warning, "disk usage high".to_string())
        .await;

    assert_eq!(broadcast.severity, Severity::Warning);

    collective.stop().await;
}

#[tokio::test]
async fn health_report_reflects_stored_memories() {
    let (_dir, collective) = start_collective().await;

    collective
        .store_memory(
            "health check memory".to_string(),
            Category::Global,
            HashSet::new(),
            Scope::MachineLocal,
            Importance::Normal,
            "agent-1".to_string(),
        )
        .await
        .unwrap();

    let report = collective.health();
    assert_eq!(report.memory_count, 1);
    assert_eq!(report.peer_count, 0);

    collective.stop().await;
}
