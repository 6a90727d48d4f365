//! Task delegation (§4.6): directed work handed to a specific agent,
//! with an explicit acceptance handshake and a timeout if it never
//! arrives.
use std::collections::HashSet;
use std::time::Duration;

use dashmap::DashMap;

use crate::error::{CollectiveError, CollectiveResult};
use crate::types::{Priority, Task, TaskState};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn new_task(description: String, required_capabilities: HashSet<String>, priority: Priority) -> Task {
    Task {
        task_id: ulid::Ulid::new().to_string(),
        description,
        required_capabilities,
        priority,
        state: TaskState::Pending,
        assignee_agent_id: None,
        created_at: now_ms(),
        deadline: None,
    }
}

/// In-flight task state plus the wall-clock deadline by which an
/// assignee's `TaskAck` must arrive (§4.6: default `T_ack` = 30s).
pub struct TaskBoard {
    tasks: DashMap<String, Task>,
    ack_deadlines: DashMap<String, i64>,
    ack_timeout: Duration,
}

impl TaskBoard {
    pub fn new(ack_timeout: Duration) -> Self {
        Self {
            tasks: DashMap::new(),
            ack_deadlines: DashMap::new(),
            ack_timeout,
        }
    }

    pub fn insert(&self, task: Task) {
        self.tasks.insert(task.task_id.clone(), task);
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.get(task_id).map(|t| t.clone())
    }

    /// Record that `agent_id` was offered the task, starting the
    /// ack-timeout clock.
    pub fn assign(&self, task_id: &str, agent_id: String) -> CollectiveResult<()> {
        let mut task = self.tasks.get_mut(task_id).ok_or_else(|| CollectiveError::not_found("task", task_id))?;
        task.state = TaskState::Assigned;
        task.assignee_agent_id = Some(agent_id);
        self.ack_deadlines.insert(task_id.to_string(), now_ms() + self.ack_timeout.as_millis() as i64);
        Ok(())
    }

    /// The assignee confirmed acceptance; clears the ack deadline.
    pub fn acknowledge(&self, task_id: &str, agent_id: &str) -> CollectiveResult<()> {
        let mut task = self.tasks.get_mut(task_id).ok_or_else(|| CollectiveError::not_found("task", task_id))?;
        match &task.assignee_agent_id {
            Some(assignee) if assignee == agent_id => {
                task.state = TaskState::InProgress;
                drop(task);
                self.ack_deadlines.remove(task_id);
                Ok(())
            }
            _ => Err(CollectiveError::conflict(task_id, format!("ack from '{agent_id}' does not match assignee"))),
        }
    }

    pub fn complete(&self, task_id: &str) -> CollectiveResult<()> {
        self.transition(task_id, TaskState::Done)
    }

    pub fn fail(&self, task_id: &str) -> CollectiveResult<()> {
        self.transition(task_id, TaskState::Failed)
    }

    /// Advisory: the assignee honors this at its next cooperative
    /// checkpoint. If unreachable, the cancellation simply never lands
    /// remotely but the local record still reflects intent.
    pub fn cancel(&self, task_id: &str) -> CollectiveResult<()> {
        self.ack_deadlines.remove(task_id);
        self.transition(task_id, TaskState::Cancelled)
    }

    fn transition(&self, task_id: &str, state: TaskState) -> CollectiveResult<()> {
        let mut task = self.tasks.get_mut(task_id).ok_or_else(|| CollectiveError::not_found("task", task_id))?;
        task.state = state;
        Ok(())
    }

    /// Task ids whose ack deadline has passed without an `acknowledge`.
    /// The caller (Coordination Bus) decides whether to retry the
    /// delegation or downgrade to best-effort (§4.6).
    pub fn overdue_acks(&self) -> Vec<String> {
        let now = now_ms();
        let overdue: Vec<String> = self
            .ack_deadlines
            .iter()
            .filter(|e| *e.value() < now)
            .map(|e| e.key().clone())
            .collect();
        for task_id in &overdue {
            self.ack_deadlines.remove(task_id);
        }
        overdue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_then_acknowledge_moves_task_in_progress() {
        let board = TaskBoard::new(Duration::from_millis(50));
        let task = new_task("do the thing".into(), HashSet::new(), Priority::Medium);
        let task_id = task.task_id.clone();
        board.insert(task);

        board.assign(&task_id, "agent-1".into()).unwrap();
        assert_eq!(board.get(&task_id).unwrap().state, TaskState::Assigned);

        board.acknowledge(&task_id, "agent-1").unwrap();
        assert_eq!(board.get(&task_id).unwrap().state, TaskState::InProgress);
        assert!(board.overdue_acks().is_empty());
    }

    #[test]
    fn acknowledge_from_the_wrong_agent_is_a_conflict() {
        let board = TaskBoard::new(Duration::from_secs(30));
        let task = new_task("x".into(), HashSet::new(), Priority::Low);
        let task_id = task.task_id.clone();
        board.insert(task);
        board.assign(&task_id, "agent-1".into()).unwrap();
        assert!(board.acknowledge(&task_id, "agent-2").is_err());
    }

    #[test]
    fn missed_ack_deadline_surfaces_as_overdue() {
        let board = TaskBoard::new(Duration::from_millis(10));
        let task = new_task("x".into(), HashSet::new(), Priority::Low);
        let task_id = task.task_id.clone();
        board.insert(task);
        board.assign(&task_id, "agent-1".into()).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let overdue = board.overdue_acks();
        assert_eq!(overdue, vec![task_id]);
    }

    #[test]
    fn cancel_clears_any_pending_ack_deadline() {
        let board = TaskBoard::new(Duration::from_secs(30));
        let task = new_task("x".into(), HashSet::new(), Priority::Low);
        let task_id = task.task_id.clone();
        board.insert(task);
        board.assign(&task_id, "agent-1".into()).unwrap();
        board.cancel(&task_id).unwrap();
        assert_eq!(board.get(&task_id).unwrap().state, TaskState::Cancelled);
        assert!(board.overdue_acks().is_empty());
    }
}
