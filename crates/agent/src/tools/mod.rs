//! Tools and the categorized tool registry
//!
//! Uncategorized tools are always offered to the main agent. Categorized tools
//! stay hidden until `route_to_category` unlocks their category. Internal
//! tools are never routable and only reach subagents.

pub mod ask;
pub mod filesystem;
pub mod message;
pub mod path_utils;
pub mod routing;
pub mod shell;
pub mod subagent;
pub mod web;

pub use ask::AskMainAgentTool;
pub use filesystem::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
pub use message::MessageTool;
pub use routing::RouteToCategoryTool;
pub use shell::ExecTool;
pub use subagent::SubagentTool;
pub use web::{WebFetchTool, WebSearchTool};

use async_trait::async_trait;
use kestrel_bus::OutboundSender;
use kestrel_config::Config;
use kestrel_provider::ToolDefinition;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::context::ExecutionContext;

pub const CATEGORY_FILESYSTEM: &str = "filesystem";
pub const CATEGORY_SHELL: &str = "shell";
pub const CATEGORY_WEB: &str = "web";

/// Error type returned by tool implementations
pub type ToolError = Box<dyn std::error::Error + Send + Sync>;

/// Payload of a successful tool call
#[derive(Debug, Clone, PartialEq)]
pub enum ToolContent {
    Text(String),
    Structured(Value),
}

/// What a tool hands back to the executor
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub success: bool,
    pub output: Option<ToolContent>,
    pub error: Option<String>,
    /// Categories to unlock for the following iterations
    pub add_tools: Option<Vec<String>>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(ToolContent::Text(text.into())),
            error: None,
            add_tools: None,
        }
    }

    pub fn structured(value: Value) -> Self {
        Self {
            success: true,
            output: Some(ToolContent::Structured(value)),
            error: None,
            add_tools: None,
        }
    }

    /// A handled failure the model should see
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            add_tools: None,
        }
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.add_tools = Some(categories);
        self
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;
    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

/// Name to tool mapping, grouped for deferred exposure
///
/// Built once at startup and shared read-only afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    base: Vec<String>,
    categories: BTreeMap<String, Vec<String>>,
    internal: HashSet<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, tool: Arc<dyn Tool>) -> String {
        let name = tool.name().to_string();
        self.base.retain(|n| n != &name);
        for names in self.categories.values_mut() {
            names.retain(|n| n != &name);
        }
        self.internal.remove(&name);
        self.tools.insert(name.clone(), tool);
        name
    }

    /// Register an always-visible tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let name = self.insert(Arc::new(tool));
        self.base.push(name);
    }

    /// Register a tool under a routable category
    pub fn register_in<T: Tool + 'static>(&mut self, category: &str, tool: T) {
        let name = self.insert(Arc::new(tool));
        self.categories
            .entry(category.to_string())
            .or_default()
            .push(name);
    }

    /// Register a tool that is never routable
    pub fn register_internal<T: Tool + 'static>(&mut self, tool: T) {
        let name = self.insert(Arc::new(tool));
        self.internal.insert(name);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn definition(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.get(name).map(|t| t.definition())
    }

    /// Always-visible tools, in registration order
    pub fn base_definitions(&self) -> Vec<ToolDefinition> {
        self.base
            .iter()
            .filter_map(|n| self.definition(n))
            .collect()
    }

    /// Tools of one category; empty for an unknown category
    pub fn category_definitions(&self, category: &str) -> Vec<ToolDefinition> {
        self.categories
            .get(category)
            .map(|names| names.iter().filter_map(|n| self.definition(n)).collect())
            .unwrap_or_default()
    }

    pub fn category_tools(&self, category: &str) -> Option<&[String]> {
        self.categories.get(category).map(|v| v.as_slice())
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.contains_key(category)
    }

    /// Category names, sorted
    pub fn categories(&self) -> Vec<String> {
        self.categories.keys().cloned().collect()
    }

    /// Snapshot of category -> tool names
    pub fn category_map(&self) -> BTreeMap<String, Vec<String>> {
        self.categories.clone()
    }

    pub fn is_internal(&self, name: &str) -> bool {
        self.internal.contains(name)
    }
}

/// Build the standard registry for a workspace
///
/// `route_to_category` is registered last so it sees every category.
pub fn register_default_tools(
    registry: &mut ToolRegistry,
    config: &Config,
    workspace: &std::path::Path,
    outbound: OutboundSender,
) {
    registry.register(MessageTool::new(outbound));
    registry.register(SubagentTool::new());

    registry.register_in(CATEGORY_FILESYSTEM, ReadFileTool::new(workspace.to_path_buf()));
    registry.register_in(CATEGORY_FILESYSTEM, WriteFileTool::new(workspace.to_path_buf()));
    registry.register_in(CATEGORY_FILESYSTEM, EditFileTool::new(workspace.to_path_buf()));
    registry.register_in(CATEGORY_FILESYSTEM, ListDirTool::new(workspace.to_path_buf()));

    registry.register_in(
        CATEGORY_SHELL,
        ExecTool::with_workspace(workspace.to_path_buf())
            .with_timeout(config.tools.exec_timeout_secs),
    );

    registry.register_in(CATEGORY_WEB, WebSearchTool::from_config(config));
    registry.register_in(CATEGORY_WEB, WebFetchTool::default());

    registry.register_internal(AskMainAgentTool);

    let routes = RouteToCategoryTool::new(registry.category_map());
    registry.register(routes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Named(&'static str);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _: Value, _: &ExecutionContext) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text(self.0))
        }
    }

    #[test]
    fn test_groups() {
        let mut registry = ToolRegistry::new();
        registry.register(Named("base_a"));
        registry.register_in("web", Named("fetch"));
        registry.register_in("web", Named("search"));
        registry.register_internal(Named("hidden"));

        let base: Vec<_> = registry.base_definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(base, vec!["base_a"]);

        let web: Vec<_> = registry
            .category_definitions("web")
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(web, vec!["fetch", "search"]);

        assert!(registry.category_definitions("nope").is_empty());
        assert!(registry.is_internal("hidden"));
        assert_eq!(registry.categories(), vec!["web"]);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_reregister_moves_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Named("x"));
        registry.register_in("shell", Named("x"));

        assert!(registry.base_definitions().is_empty());
        assert_eq!(registry.category_tools("shell"), Some(&["x".to_string()][..]));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_tool_output_builders() {
        let out = ToolOutput::text("ok").with_categories(vec!["web".into()]);
        assert!(out.success);
        assert_eq!(out.add_tools, Some(vec!["web".to_string()]));

        let failed = ToolOutput::failure("nope");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("nope"));
        assert!(failed.output.is_none());
    }
}
