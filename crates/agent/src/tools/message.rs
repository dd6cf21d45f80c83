//! send_message: push a message (or file) to a chat channel

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use kestrel_bus::{OutboundMessage, OutboundSender};

use super::path_utils::validate_workspace_path;
use super::{Tool, ToolError, ToolOutput};
use crate::context::ExecutionContext;

/// Publishes outbound messages, defaulting to the current conversation
#[derive(Clone)]
pub struct MessageTool {
    sender: OutboundSender,
}

impl MessageTool {
    pub fn new(sender: OutboundSender) -> Self {
        Self { sender }
    }
}

#[derive(Deserialize)]
struct MessageArgs {
    content: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    chat_id: Option<String>,
    #[serde(default)]
    file: Option<String>,
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "send_message"
    }
    fn description(&self) -> &str {
        "Send a message to a chat. Use it to reach another chat or to attach a workspace file; normal replies need no tool."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "Message text" },
                "channel": { "type": "string", "description": "Target channel (defaults to the current one)" },
                "chat_id": { "type": "string", "description": "Target chat ID (defaults to the current one)" },
                "file": { "type": "string", "description": "Workspace file to attach" }
            },
            "required": ["content"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        let args: MessageArgs = serde_json::from_value(args)?;

        let channel = args
            .channel
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| ctx.channel.clone());
        let chat_id = args
            .chat_id
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| ctx.chat_id.clone());
        if channel.is_empty() || chat_id.is_empty() {
            return Ok(ToolOutput::failure("no target chat: pass channel and chat_id"));
        }

        let mut msg = OutboundMessage::new(&channel, &chat_id, args.content);
        if let Some(file) = args.file {
            let path = validate_workspace_path(&file, &ctx.workspace).await?;
            if !path.is_file() {
                return Ok(ToolOutput::failure(format!("File not found: {}", file)));
            }
            msg = msg.with_file(path.to_string_lossy());
        }

        debug!("send_message to {}:{}", channel, chat_id);
        self.sender.send(msg)?;

        Ok(ToolOutput::text(format!("Message sent to {}:{}", channel, chat_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn ctx(workspace: &std::path::Path) -> ExecutionContext {
        ExecutionContext::new(workspace, "telegram", "42", "telegram:42", "m")
    }

    #[tokio::test]
    async fn test_defaults_to_current_chat() {
        let dir = tempfile::TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tool = MessageTool::new(tx);

        let out = tool
            .execute(json!({"content": "hi"}), &ctx(dir.path()))
            .await
            .unwrap();
        assert!(out.success);

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, "telegram");
        assert_eq!(msg.chat_id, "42");
        assert_eq!(msg.content, "hi");
        assert!(msg.file.is_none());
    }

    #[tokio::test]
    async fn test_explicit_target_and_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("report.txt"), "data").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tool = MessageTool::new(tx);

        let out = tool
            .execute(
                json!({"content": "see attached", "channel": "cli", "chat_id": "7", "file": "report.txt"}),
                &ctx(dir.path()),
            )
            .await
            .unwrap();
        assert!(out.success);

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, "cli");
        assert_eq!(msg.chat_id, "7");
        assert!(msg.file.unwrap().ends_with("report.txt"));
    }

    #[tokio::test]
    async fn test_missing_file_is_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let tool = MessageTool::new(tx);

        let out = tool
            .execute(json!({"content": "x", "file": "nope.pdf"}), &ctx(dir.path()))
            .await
            .unwrap();
        assert!(!out.success);
    }
}
