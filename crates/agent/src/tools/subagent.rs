//! subagent: delegate work to a researcher, coder or general agent

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{Tool, ToolError, ToolOutput};
use crate::context::ExecutionContext;
use crate::subagent::Task;

/// Front end of the subagent coordinator for the main agent
#[derive(Default)]
pub struct SubagentTool;

impl SubagentTool {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum Action {
    Launch,
    Chat,
    Status,
    List,
}

#[derive(Deserialize)]
struct SubagentArgs {
    action: Action,
    #[serde(default)]
    agent_type: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    subagent_id: Option<String>,
}

fn required<'a>(value: &'a Option<String>, field: &str, action: &str) -> Result<&'a str, ToolOutput> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ToolOutput::failure(format!("'{}' is required for action '{}'", field, action)))
}

fn task_json(task: &Task) -> serde_json::Value {
    json!({
        "subagent_id": task.agent_id,
        "type": task.agent_type,
        "name": task.agent_name,
        "status": task.status,
        "result": task.result,
        "error": task.error,
        "started_at": task.started_at,
        "completed_at": task.completed_at
    })
}

#[async_trait]
impl Tool for SubagentTool {
    fn name(&self) -> &str {
        "subagent"
    }
    fn description(&self) -> &str {
        "Delegate work to a subagent. launch starts one in the background (agent_type: researcher, coder or general); \
         chat sends a follow-up or answers its question and waits for the reply; status and list report progress."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["launch", "chat", "status", "list"] },
                "agent_type": { "type": "string", "enum": ["researcher", "coder", "general"], "description": "For launch" },
                "prompt": { "type": "string", "description": "Task for launch, message or answer for chat" },
                "subagent_id": { "type": "string", "description": "For chat and status" }
            },
            "required": ["action"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        if ctx.is_subagent() {
            return Ok(ToolOutput::failure("subagents cannot start or manage other subagents"));
        }
        let Some(coordinator) = ctx.coordinator.as_ref() else {
            return Ok(ToolOutput::failure("subagents are not available here"));
        };
        let args: SubagentArgs = serde_json::from_value(args)?;

        match args.action {
            Action::Launch => {
                let agent_type = match required(&args.agent_type, "agent_type", "launch") {
                    Ok(v) => v,
                    Err(out) => return Ok(out),
                };
                let prompt = match required(&args.prompt, "prompt", "launch") {
                    Ok(v) => v,
                    Err(out) => return Ok(out),
                };
                let receipt = coordinator.launch(agent_type, prompt, ctx).await?;
                Ok(ToolOutput::structured(serde_json::to_value(receipt)?))
            }
            Action::Chat => {
                let id = match required(&args.subagent_id, "subagent_id", "chat") {
                    Ok(v) => v,
                    Err(out) => return Ok(out),
                };
                let prompt = match required(&args.prompt, "prompt", "chat") {
                    Ok(v) => v,
                    Err(out) => return Ok(out),
                };
                let reply = coordinator.chat(id, prompt).await?;
                Ok(ToolOutput::structured(serde_json::to_value(reply)?))
            }
            Action::Status => {
                let id = match required(&args.subagent_id, "subagent_id", "status") {
                    Ok(v) => v,
                    Err(out) => return Ok(out),
                };
                match coordinator.status(id) {
                    Some(task) => {
                        let mut value = task_json(&task);
                        if let Some(question) = coordinator.bridge().pending(id) {
                            value["question"] = json!(question);
                        }
                        Ok(ToolOutput::structured(value))
                    }
                    None => Ok(ToolOutput::failure(format!("unknown subagent: {}", id))),
                }
            }
            Action::List => {
                let tasks: Vec<_> = coordinator.list().iter().map(task_json).collect();
                Ok(ToolOutput::structured(json!({ "subagents": tasks })))
            }
        }
    }
}
