//! ask_main_agent: a subagent blocks until the main agent answers

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{Tool, ToolError, ToolOutput};
use crate::context::ExecutionContext;

/// Only handed to subagents; never routable
pub struct AskMainAgentTool;

#[derive(Deserialize)]
struct AskArgs {
    question: String,
}

#[async_trait]
impl Tool for AskMainAgentTool {
    fn name(&self) -> &str {
        "ask_main_agent"
    }
    fn description(&self) -> &str {
        "Ask the main agent a question and wait for its answer. Use it when you need a decision or missing information."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string", "description": "What you need to know" }
            },
            "required": ["question"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        let args: AskArgs = serde_json::from_value(args)?;
        let Some(coordinator) = ctx.coordinator.as_ref() else {
            return Ok(ToolOutput::failure("subagents are not available here"));
        };
        let answer = coordinator.ask_main_agent(ctx, &args.question).await?;
        Ok(ToolOutput::text(answer))
    }
}
