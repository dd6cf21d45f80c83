//! Lifecycle records for subagent runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Subagent this task belongs to
    pub agent_id: String,
    pub agent_type: String,
    pub agent_name: String,
    pub session_id: String,
    /// Session that delegated the work
    pub caller_session_id: String,
    pub prompt: String,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        agent_id: impl Into<String>,
        agent_type: impl Into<String>,
        agent_name: impl Into<String>,
        session_id: impl Into<String>,
        caller_session_id: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            agent_name: agent_name.into(),
            session_id: session_id.into(),
            caller_session_id: caller_session_id.into(),
            prompt: prompt.into(),
            status: TaskStatus::Running,
            result: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Task records keyed by subagent id
///
/// Every method takes `&self`; updates for unknown ids are logged and ignored.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Task>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, task: Task) {
        self.lock().insert(task.agent_id.clone(), task);
    }

    fn finish(&self, agent_id: &str, status: TaskStatus, result: Option<String>, error: Option<String>) -> bool {
        let mut tasks = self.lock();
        let Some(task) = tasks.get_mut(agent_id) else {
            warn!("attempted to update unknown task {}", agent_id);
            return false;
        };
        task.status = status;
        task.result = result;
        task.error = error;
        task.completed_at = Some(Utc::now());
        true
    }

    pub fn complete(&self, agent_id: &str, result: impl Into<String>) -> bool {
        self.finish(agent_id, TaskStatus::Completed, Some(result.into()), None)
    }

    pub fn fail(&self, agent_id: &str, error: impl Into<String>) -> bool {
        self.finish(agent_id, TaskStatus::Failed, None, Some(error.into()))
    }

    /// Put a finished task back to running for a follow-up turn
    pub fn reopen(&self, agent_id: &str, prompt: impl Into<String>) -> bool {
        let mut tasks = self.lock();
        let Some(task) = tasks.get_mut(agent_id) else {
            warn!("attempted to reopen unknown task {}", agent_id);
            return false;
        };
        task.status = TaskStatus::Running;
        task.prompt = prompt.into();
        task.result = None;
        task.error = None;
        task.completed_at = None;
        true
    }

    pub fn get(&self, agent_id: &str) -> Option<Task> {
        self.lock().get(agent_id).cloned()
    }

    /// All tasks, oldest first
    pub fn get_all(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.lock().values().cloned().collect();
        tasks.sort_by_key(|t| t.started_at);
        tasks
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop the oldest finished tasks until at most `max_retained` remain
    ///
    /// Running tasks are never evicted. Returns the evicted records.
    pub fn evict(&self, max_retained: usize) -> Vec<Task> {
        let mut tasks = self.lock();
        if tasks.len() <= max_retained {
            return Vec::new();
        }
        let mut finished: Vec<(DateTime<Utc>, String)> = tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .map(|t| (t.completed_at.unwrap_or(t.started_at), t.agent_id.clone()))
            .collect();
        finished.sort();

        let excess = tasks.len() - max_retained;
        finished
            .into_iter()
            .take(excess)
            .filter_map(|(_, id)| tasks.remove(&id))
            .collect()
    }
}
