//! Prompt assembly and the per-run execution context handed to tools

use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::subagent::SubagentCoordinator;

/// Values every tool call in one run can see
///
/// Passed unchanged to each `Tool::execute`. Cloning is cheap.
#[derive(Clone)]
pub struct ExecutionContext {
    pub workspace: PathBuf,
    pub channel: String,
    pub chat_id: String,
    /// Session the run appends to
    pub session_id: String,
    pub model: String,
    /// Platform id of the message being answered
    pub message_id: Option<String>,
    /// Set when the run belongs to a subagent
    pub subagent_id: Option<String>,
    pub coordinator: Option<Arc<SubagentCoordinator>>,
}

impl ExecutionContext {
    pub fn new(
        workspace: impl Into<PathBuf>,
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        session_id: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            channel: channel.into(),
            chat_id: chat_id.into(),
            session_id: session_id.into(),
            model: model.into(),
            message_id: None,
            subagent_id: None,
            coordinator: None,
        }
    }

    pub fn with_message_id(mut self, message_id: Option<String>) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn with_coordinator(mut self, coordinator: Arc<SubagentCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Context for a subagent run started from `self`'s conversation
    pub fn for_subagent(&self, subagent_id: &str, session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            message_id: None,
            subagent_id: Some(subagent_id.to_string()),
            ..self.clone()
        }
    }

    pub fn is_subagent(&self) -> bool {
        self.subagent_id.is_some()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("workspace", &self.workspace)
            .field("channel", &self.channel)
            .field("chat_id", &self.chat_id)
            .field("session_id", &self.session_id)
            .field("model", &self.model)
            .field("subagent_id", &self.subagent_id)
            .finish_non_exhaustive()
    }
}

/// Builds the main agent's system prompt
pub struct ContextBuilder {
    workspace: PathBuf,
}

impl ContextBuilder {
    /// Workspace files folded into the prompt, in order
    pub const BOOTSTRAP_FILES: &'static [&'static str] = &["AGENTS.md", "SOUL.md", "USER.md"];

    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
        }
    }

    pub fn memory_path(&self) -> PathBuf {
        self.workspace.join("memory").join("MEMORY.md")
    }

    pub async fn build_system_prompt(&self) -> String {
        let mut parts = vec![self.identity()];

        let bootstrap = self.load_bootstrap_files().await;
        if !bootstrap.is_empty() {
            parts.push(bootstrap);
        }

        let memory = self.load_memory().await;
        if !memory.is_empty() {
            parts.push(format!("# Memory\n\n{}", memory));
        }

        parts.join("\n\n---\n\n")
    }

    fn identity(&self) -> String {
        let now = Local::now().format("%Y-%m-%d %H:%M (%A)");
        let workspace = self.workspace.display();

        format!(
            r#"# kestrel

You are kestrel, a personal AI assistant.

## Current Time
{now}

## Workspace
Your workspace is at: {workspace}
Long-term memory lives in {memory}.

## Tools
Only a few tools are visible at first. Tools are grouped into categories
(filesystem, shell, web). Call `route_to_category` with a category name to
unlock its tools for the rest of this request.

For larger jobs use the `subagent` tool to delegate to a researcher, coder or
general agent. Subagents may ask you questions; answer them with
`subagent` action `chat`.

Reply to the user with plain text. Use `send_message` only to reach a different
chat or to send a file."#,
            memory = self.memory_path().display(),
        )
    }

    async fn load_bootstrap_files(&self) -> String {
        let mut parts = Vec::new();

        for filename in Self::BOOTSTRAP_FILES {
            let path = self.workspace.join(filename);
            if !path.exists() {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => parts.push(format!("## {}\n\n{}", filename, content.trim())),
                Err(e) => debug!("Failed to read {}: {}", filename, e),
            }
        }

        parts.join("\n\n")
    }

    async fn load_memory(&self) -> String {
        tokio::fs::read_to_string(self.memory_path())
            .await
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }
}
