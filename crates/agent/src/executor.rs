//! Tool execution: allow-list checks, argument decoding, result normalization
//!
//! [`ToolExecutor::execute`] never fails. Every problem, from a hidden tool to
//! a panicking one, comes back as an error result the model can read.

use futures::future::join_all;
use futures::FutureExt;
use kestrel_provider::{Message, ToolArguments, ToolCall, ToolDefinition};
use serde_json::Value;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::tools::{ToolContent, ToolRegistry};

/// Tool names the model may call in the current iteration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedToolSet(HashSet<String>);

impl AllowedToolSet {
    pub fn from_definitions(definitions: &[ToolDefinition]) -> Self {
        Self(definitions.iter().map(|d| d.name.clone()).collect())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.iter().cloned().collect();
        names.sort();
        names
    }
}

impl<S: Into<String>> FromIterator<S> for AllowedToolSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Side effect a tool result has on the running conversation
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ToolEffect {
    #[default]
    None,
    /// Unlock these categories from the next iteration on
    ExpandToolCategories(Vec<String>),
}

/// Normalized outcome of one tool call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecutionResult {
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
    pub effect: ToolEffect,
    pub is_error: bool,
}

impl ToolExecutionResult {
    fn error(call: &ToolCall, content: String) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            content,
            effect: ToolEffect::None,
            is_error: true,
        }
    }

    /// The tool message appended to the session
    pub fn to_message(&self) -> Message {
        Message::tool(&self.tool_call_id, &self.name, &self.content)
    }
}

/// Runs tool calls against a shared registry
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    call_timeout: Option<Duration>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            call_timeout: None,
        }
    }

    /// Abort single calls that run longer than `timeout`
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ExecutionContext,
        allowed: &AllowedToolSet,
    ) -> ToolExecutionResult {
        if !allowed.contains(&call.name) {
            debug!("blocked call to hidden tool {}", call.name);
            return ToolExecutionResult::error(
                call,
                format!(
                    "Error: Tool '{}' is not available right now. Use route_to_category to unlock its category first.",
                    call.name
                ),
            );
        }

        let Some(tool) = self.registry.get(&call.name) else {
            return ToolExecutionResult::error(call, format!("Error: unknown tool '{}'", call.name));
        };

        let args = match decode_arguments(&call.arguments) {
            Ok(args) => args,
            Err(e) => {
                return ToolExecutionResult::error(
                    call,
                    format!("Error: invalid JSON arguments for tool '{}': {}", call.name, e),
                )
            }
        };

        debug!("executing tool {} ({})", call.name, call.id);
        let invocation = AssertUnwindSafe(tool.execute(args, ctx)).catch_unwind();
        let outcome = match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, invocation).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("tool {} timed out after {:?}", call.name, limit);
                    return ToolExecutionResult::error(
                        call,
                        format!(
                            "Error executing tool: '{}' timed out after {}s",
                            call.name,
                            limit.as_secs()
                        ),
                    );
                }
            },
            None => invocation.await,
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(panic) => return panicked(call, panic.as_ref()),
        };

        let output = match outcome {
            Ok(output) => output,
            Err(e) => {
                debug!("tool {} raised: {}", call.name, e);
                return ToolExecutionResult::error(call, format!("Error executing tool: {}", e));
            }
        };

        let effect = match output.add_tools {
            Some(categories) if !categories.is_empty() => {
                ToolEffect::ExpandToolCategories(categories)
            }
            _ => ToolEffect::None,
        };

        let (content, is_error) = if output.success {
            let content = match output.output {
                Some(ToolContent::Text(text)) => text,
                Some(ToolContent::Structured(value)) => value.to_string(),
                None => String::new(),
            };
            (content, false)
        } else {
            let message = output.error.unwrap_or_else(|| "tool failed".to_string());
            (format!("Error: {}", message), true)
        };

        ToolExecutionResult {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            content,
            effect,
            is_error,
        }
    }

    /// Run every call concurrently; results keep input order
    pub async fn execute_batch(
        &self,
        calls: &[ToolCall],
        ctx: &ExecutionContext,
        allowed: &AllowedToolSet,
    ) -> Vec<ToolExecutionResult> {
        let runs = calls
            .iter()
            .map(|call| AssertUnwindSafe(self.execute(call, ctx, allowed)).catch_unwind());

        join_all(runs)
            .await
            .into_iter()
            .zip(calls)
            .map(|(outcome, call)| match outcome {
                Ok(result) => result,
                Err(panic) => panicked(call, panic.as_ref()),
            })
            .collect()
    }
}

fn panicked(call: &ToolCall, panic: &(dyn Any + Send)) -> ToolExecutionResult {
    let reason = panic_message(panic);
    warn!("tool {} panicked: {}", call.name, reason);
    ToolExecutionResult::error(
        call,
        format!("Error executing tool: '{}' panicked: {}", call.name, reason),
    )
}

fn decode_arguments(arguments: &ToolArguments) -> Result<Value, serde_json::Error> {
    match arguments {
        ToolArguments::Structured(value) => Ok(value.clone()),
        ToolArguments::Raw(raw) => {
            let raw = raw.trim();
            if raw.is_empty() {
                Ok(Value::Object(Default::default()))
            } else {
                serde_json::from_str(raw)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
