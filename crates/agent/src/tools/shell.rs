//! Shell command tool

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::path_utils::validate_workspace_path;
use super::{Tool, ToolError, ToolOutput};
use crate::context::ExecutionContext;

const MAX_OUTPUT_LEN: usize = 10_000;

/// Runs `sh -c <command>` inside the workspace
pub struct ExecTool {
    timeout_secs: u64,
    workspace: PathBuf,
}

impl ExecTool {
    pub fn with_workspace(workspace: PathBuf) -> Self {
        Self {
            timeout_secs: 60,
            workspace,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs.max(1);
        self
    }
}

#[derive(Deserialize)]
struct ExecArgs {
    command: String,
    working_dir: Option<String>,
}

fn truncate(mut output: String) -> String {
    if output.len() <= MAX_OUTPUT_LEN {
        return output;
    }
    let mut cut = MAX_OUTPUT_LEN;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    let remaining = output.len() - cut;
    output.truncate(cut);
    format!("{}\n[output truncated: {} more bytes]", output, remaining)
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }
    fn description(&self) -> &str {
        "Run a shell command in the workspace and return stdout, stderr and the exit code."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command" },
                "working_dir": { "type": "string", "description": "Directory inside the workspace (default: workspace root)" }
            },
            "required": ["command"]
        })
    }
    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        let args: ExecArgs = serde_json::from_value(args)?;

        let working_dir = match args.working_dir {
            Some(dir) => validate_workspace_path(&dir, &self.workspace).await?,
            None => self.workspace.clone(),
        };

        debug!("exec: {}", args.command);
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&args.command)
            .current_dir(working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = match tokio::time::timeout(
            std::time::Duration::from_secs(self.timeout_secs),
            cmd.output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Ok(ToolOutput::failure(format!("Failed to run command: {}", e))),
            Err(_) => {
                return Ok(ToolOutput::failure(format!(
                    "Command timed out after {} seconds",
                    self.timeout_secs
                )))
            }
        };

        let mut parts = Vec::new();
        if !result.stdout.is_empty() {
            parts.push(String::from_utf8_lossy(&result.stdout).to_string());
        }
        if !result.stderr.is_empty() {
            parts.push(format!(
                "STDERR:\n{}",
                String::from_utf8_lossy(&result.stderr)
            ));
        }
        if result.status.code() != Some(0) {
            parts.push(format!("Exit code: {}", result.status.code().unwrap_or(-1)));
        }

        let output = if parts.is_empty() {
            "(no output)".to_string()
        } else {
            parts.join("\n")
        };
        Ok(ToolOutput::text(truncate(output)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "é".repeat(MAX_OUTPUT_LEN);
        let out = truncate(long);
        assert!(out.contains("[output truncated:"));
    }

    #[test]
    fn test_truncate_short_untouched() {
        assert_eq!(truncate("ok".to_string()), "ok");
    }
}
