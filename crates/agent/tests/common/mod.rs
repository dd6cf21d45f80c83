//! Shared fixtures for the agent integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use kestrel_agent::tools::RouteToCategoryTool;
use kestrel_agent::{
    ConversationEngine, ExecutionContext, Tool, ToolError, ToolExecutor, ToolOutput, ToolRegistry,
};
use kestrel_provider::{ChatParams, ChatResponse, Message, Provider, ProviderError, ToolCall};
use kestrel_session::SessionStore;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replays a fixed list of responses and records every request
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ChatResponse>>,
    repeat: Option<ChatResponse>,
    fail: bool,
    requests: Mutex<Vec<ChatParams>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            repeat: None,
            fail: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every request with `response`
    pub fn repeating(response: ChatResponse) -> Self {
        Self {
            repeat: Some(response),
            ..Self::new(vec![])
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(vec![])
        }
    }

    pub fn requests(&self) -> Vec<ChatParams> {
        self.requests.lock().unwrap().clone()
    }

    /// Tool names offered in request `i`
    pub fn tool_names(&self, i: usize) -> Vec<String> {
        self.requests()[i].tools.iter().map(|t| t.name.clone()).collect()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn chat(&self, params: ChatParams) -> kestrel_provider::Result<ChatResponse> {
        self.requests.lock().unwrap().push(params);
        if self.fail {
            return Err(ProviderError::Api("upstream unavailable".to_string()));
        }
        let next = self.script.lock().unwrap().pop_front();
        match (next, &self.repeat) {
            (Some(response), _) => Ok(response),
            (None, Some(response)) => Ok(response.clone()),
            (None, None) => Ok(ChatResponse::text("script exhausted")),
        }
    }

    fn default_model(&self) -> String {
        "test-model".to_string()
    }

    fn is_configured(&self) -> bool {
        true
    }
}

/// Answers from a closure over the request, for multi-session scenarios
pub struct FnProvider<F>(pub F);

#[async_trait]
impl<F> Provider for FnProvider<F>
where
    F: Fn(&ChatParams) -> ChatResponse + Send + Sync,
{
    async fn chat(&self, params: ChatParams) -> kestrel_provider::Result<ChatResponse> {
        Ok((self.0)(&params))
    }

    fn default_model(&self) -> String {
        "test-model".to_string()
    }

    fn is_configured(&self) -> bool {
        true
    }
}

/// Counts calls and echoes its arguments
pub struct EchoTool {
    pub name: &'static str,
    pub calls: Arc<AtomicUsize>,
}

impl EchoTool {
    pub fn new(name: &'static str) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                name,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "Echo the arguments"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolOutput::text(format!("{} got {}", self.name, args)))
    }
}

/// Sleeps before answering
pub struct SlowTool {
    pub name: &'static str,
    pub delay: Duration,
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "Sleep, then answer"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _args: Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok(ToolOutput::text(format!("{} done", self.name)))
    }
}

pub struct PanicTool;

#[async_trait]
impl Tool for PanicTool {
    fn name(&self) -> &str {
        "explode"
    }
    fn description(&self) -> &str {
        "Always panics"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _args: Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        panic!("tool exploded");
    }
}

/// Reports a handled failure
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "flaky"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _args: Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::failure("disk full"))
    }
}

/// Raises an error instead of returning a result
pub struct RaisingTool;

#[async_trait]
impl Tool for RaisingTool {
    fn name(&self) -> &str {
        "raiser"
    }
    fn description(&self) -> &str {
        "Always errors"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _args: Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        Err("kaboom".into())
    }
}

pub struct StructuredTool;

#[async_trait]
impl Tool for StructuredTool {
    fn name(&self) -> &str {
        "structured"
    }
    fn description(&self) -> &str {
        "Returns JSON"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _args: Value, _ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::structured(json!({"b": 2, "a": [1, "x"]})))
    }
}

/// Call counters of [`routed_registry`]
pub struct RoutedCounters {
    pub echo: Arc<AtomicUsize>,
    pub web_search: Arc<AtomicUsize>,
    pub web_fetch: Arc<AtomicUsize>,
    pub exec: Arc<AtomicUsize>,
}

/// `echo` and `route_to_category` always visible; web and shell tools deferred
pub fn routed_registry() -> (ToolRegistry, RoutedCounters) {
    let mut registry = ToolRegistry::new();
    let (echo, echo_calls) = EchoTool::new("echo");
    let (search, search_calls) = EchoTool::new("web_search");
    let (fetch, fetch_calls) = EchoTool::new("web_fetch");
    let (exec, exec_calls) = EchoTool::new("exec");

    registry.register(echo);
    registry.register_in("web", search);
    registry.register_in("web", fetch);
    registry.register_in("shell", exec);
    let routes = RouteToCategoryTool::new(registry.category_map());
    registry.register(routes);

    (
        registry,
        RoutedCounters {
            echo: echo_calls,
            web_search: search_calls,
            web_fetch: fetch_calls,
            exec: exec_calls,
        },
    )
}

pub fn engine(provider: Arc<dyn Provider>, registry: ToolRegistry) -> ConversationEngine {
    let executor = Arc::new(ToolExecutor::new(Arc::new(registry)));
    ConversationEngine::new(provider, Arc::new(SessionStore::new(50)), executor)
}

pub fn ctx(session_id: &str) -> ExecutionContext {
    ExecutionContext::new("/tmp", "cli", "direct", session_id, "")
}

/// A tool call with raw JSON arguments, as providers send them
pub fn call(id: &str, name: &str, args: Value) -> ToolCall {
    ToolCall::new(id, name, args.to_string().as_str())
}

pub fn tool_turn(calls: Vec<ToolCall>) -> ChatResponse {
    ChatResponse::with_tool_calls(None, calls)
}

/// Every tool message answers a call of the closest preceding assistant turn
pub fn assert_tool_pairing(messages: &[Message]) {
    let mut open: Vec<String> = Vec::new();
    for message in messages {
        match message {
            Message::Assistant { .. } => {
                open = message.tool_calls().iter().map(|c| c.id.clone()).collect();
            }
            Message::Tool { tool_call_id, .. } => {
                assert!(
                    open.contains(tool_call_id),
                    "tool message {} has no matching call",
                    tool_call_id
                );
            }
            _ => open.clear(),
        }
    }
}
