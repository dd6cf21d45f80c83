//! Workspace file tools: read, write, edit, list

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;

use tracing::debug;

use super::path_utils::validate_workspace_path;
use super::{Tool, ToolError, ToolOutput};
use crate::context::ExecutionContext;

/// Largest file `read_file` returns in full
const MAX_READ_BYTES: usize = 256 * 1024;

fn io_failure(path: &str, e: std::io::Error) -> ToolOutput {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        ToolOutput::failure(format!("Permission denied: {}", path))
    } else {
        ToolOutput::failure(format!("I/O error on {}: {}", path, e))
    }
}

pub struct ReadFileTool {
    workspace: PathBuf,
}

impl ReadFileTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[derive(Deserialize)]
struct ReadFileArgs {
    path: String,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }
    fn description(&self) -> &str {
        "Read a text file from the workspace."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string", "description": "File path, relative to the workspace" } },
            "required": ["path"]
        })
    }
    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        let args: ReadFileArgs = serde_json::from_value(args)?;
        let path = validate_workspace_path(&args.path, &self.workspace).await?;

        debug!("read_file {:?}", path);
        if !path.exists() {
            return Ok(ToolOutput::failure(format!("File not found: {}", args.path)));
        }
        if !path.is_file() {
            return Ok(ToolOutput::failure(format!("Not a file: {}", args.path)));
        }
        match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.len() > MAX_READ_BYTES => {
                let mut cut = MAX_READ_BYTES;
                while !content.is_char_boundary(cut) {
                    cut -= 1;
                }
                Ok(ToolOutput::text(format!(
                    "{}\n\n[truncated: file is {} bytes]",
                    &content[..cut],
                    content.len()
                )))
            }
            Ok(content) => Ok(ToolOutput::text(content)),
            Err(e) => Ok(io_failure(&args.path, e)),
        }
    }
}

pub struct WriteFileTool {
    workspace: PathBuf,
}

impl WriteFileTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[derive(Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }
    fn description(&self) -> &str {
        "Write a file in the workspace, creating parent directories as needed."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, relative to the workspace" },
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "content"]
        })
    }
    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        let args: WriteFileArgs = serde_json::from_value(args)?;
        let path = validate_workspace_path(&args.path, &self.workspace).await?;

        debug!("write_file {:?}", path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::write(&path, &args.content).await {
            Ok(_) => Ok(ToolOutput::text(format!(
                "Wrote {} bytes to {}",
                args.content.len(),
                args.path
            ))),
            Err(e) => Ok(io_failure(&args.path, e)),
        }
    }
}

pub struct EditFileTool {
    workspace: PathBuf,
}

impl EditFileTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[derive(Deserialize)]
struct EditFileArgs {
    path: String,
    old_text: String,
    new_text: String,
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }
    fn description(&self) -> &str {
        "Replace one exact occurrence of old_text with new_text in a workspace file."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, relative to the workspace" },
                "old_text": { "type": "string", "description": "Text to replace; must match exactly once" },
                "new_text": { "type": "string", "description": "Replacement text" }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }
    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        let args: EditFileArgs = serde_json::from_value(args)?;
        let path = validate_workspace_path(&args.path, &self.workspace).await?;

        debug!("edit_file {:?}", path);
        if !path.exists() {
            return Ok(ToolOutput::failure(format!("File not found: {}", args.path)));
        }
        let content = tokio::fs::read_to_string(&path).await?;
        let count = content.matches(&args.old_text).count();
        if count == 0 {
            return Ok(ToolOutput::failure("old_text not found in file"));
        }
        if count > 1 {
            return Ok(ToolOutput::failure(format!(
                "old_text is ambiguous: {} matches; include more context",
                count
            )));
        }
        let new_content = content.replacen(&args.old_text, &args.new_text, 1);
        match tokio::fs::write(&path, new_content).await {
            Ok(_) => Ok(ToolOutput::text(format!("Edited {}", args.path))),
            Err(e) => Ok(io_failure(&args.path, e)),
        }
    }
}

pub struct ListDirTool {
    workspace: PathBuf,
}

impl ListDirTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[derive(Deserialize)]
struct ListDirArgs {
    #[serde(default = "default_dir")]
    path: String,
}

fn default_dir() -> String {
    ".".to_string()
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }
    fn description(&self) -> &str {
        "List the entries of a workspace directory."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string", "description": "Directory, relative to the workspace (default: workspace root)" } }
        })
    }
    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        let args: ListDirArgs = serde_json::from_value(args)?;
        let path = validate_workspace_path(&args.path, &self.workspace).await?;

        debug!("list_dir {:?}", path);
        if !path.exists() {
            return Ok(ToolOutput::failure(format!("Directory not found: {}", args.path)));
        }
        if !path.is_dir() {
            return Ok(ToolOutput::failure(format!("Not a directory: {}", args.path)));
        }
        let mut entries = tokio::fs::read_dir(&path).await?;
        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let prefix = if entry.file_type().await?.is_dir() {
                "[DIR] "
            } else {
                "[FILE] "
            };
            items.push(format!("{}{}", prefix, name));
        }
        items.sort();
        if items.is_empty() {
            Ok(ToolOutput::text(format!("{} is empty", args.path)))
        } else {
            Ok(ToolOutput::text(items.join("\n")))
        }
    }
}
