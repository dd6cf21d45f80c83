//! The bounded LLM / tool iteration loop

use kestrel_provider::{ChatParams, Message, Provider, ToolChoice, ToolDefinition};
use kestrel_session::SessionStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::context::ExecutionContext;
use crate::executor::{AllowedToolSet, ToolEffect, ToolExecutor};
use crate::{AgentError, Result};

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The model answered with text and no tool calls
    FinalResponse,
    /// The model returned neither text nor tool calls
    EmptyCompletion,
    MaxIterations,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub response: Option<String>,
    pub reached_max_iterations: bool,
    pub iterations: usize,
    pub termination: Termination,
}

impl RunOutcome {
    fn finished(termination: Termination, response: Option<String>, iterations: usize) -> Self {
        Self {
            response,
            reached_max_iterations: termination == Termination::MaxIterations,
            iterations,
            termination,
        }
    }
}

/// Drives one conversation until the model stops calling tools
///
/// The engine keeps no per-run state of its own: history lives in the
/// session store and category routing starts empty on every [`run`].
///
/// [`run`]: ConversationEngine::run
#[derive(Clone)]
pub struct ConversationEngine {
    provider: Arc<dyn Provider>,
    sessions: Arc<SessionStore>,
    executor: Arc<ToolExecutor>,
    model: String,
    max_iterations: usize,
    max_tokens: u32,
    temperature: f32,
}

impl ConversationEngine {
    pub fn new(
        provider: Arc<dyn Provider>,
        sessions: Arc<SessionStore>,
        executor: Arc<ToolExecutor>,
    ) -> Self {
        let model = provider.default_model();
        Self {
            provider,
            sessions,
            executor,
            model,
            max_iterations: kestrel_config::DEFAULT_MAX_AGENT_ITERATIONS as usize,
            max_tokens: 8192,
            temperature: 0.7,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.is_empty() {
            self.model = model;
        }
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    /// Base tools followed by every routed category, deduplicated by name
    fn current_tools(&self, base_tools: &[ToolDefinition], routed: &[String]) -> Vec<ToolDefinition> {
        let mut tools = Vec::with_capacity(base_tools.len());
        let mut seen = HashSet::new();
        for def in base_tools {
            if seen.insert(def.name.clone()) {
                tools.push(def.clone());
            }
        }
        let registry = self.executor.registry();
        for category in routed {
            for def in registry.category_definitions(category) {
                if seen.insert(def.name.clone()) {
                    tools.push(def);
                }
            }
        }
        tools
    }

    /// Run the loop on `session_id` until it terminates
    ///
    /// The caller appends the user message first. `on_intermediate` receives
    /// text the model sends alongside tool calls.
    pub async fn run(
        &self,
        session_id: &str,
        base_tools: &[ToolDefinition],
        ctx: &ExecutionContext,
        on_intermediate: Option<&(dyn Fn(&str) + Send + Sync)>,
    ) -> Result<RunOutcome> {
        let model = if ctx.model.is_empty() {
            self.model.clone()
        } else {
            ctx.model.clone()
        };
        let mut routed: Vec<String> = Vec::new();

        for iteration in 1..=self.max_iterations {
            let history = self.sessions.llm_history(session_id).await;
            let tools = self.current_tools(base_tools, &routed);
            let allowed = AllowedToolSet::from_definitions(&tools);
            debug!(
                "{} iteration {}: {} messages, {} tools",
                session_id,
                iteration,
                history.len(),
                tools.len()
            );

            let params = ChatParams {
                model: model.clone(),
                messages: history,
                tools,
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                tool_choice: ToolChoice::Auto,
            };

            let response = self.provider.chat(params).await.map_err(|e| {
                error!("LLM request failed for {}: {}", session_id, e);
                AgentError::LlmRequestFailed(e.to_string())
            })?;

            let content = response.text_content().map(str::to_string);
            self.sessions
                .append(
                    session_id,
                    Message::assistant_with_tools(content.clone(), response.tool_calls.clone()),
                )
                .await;

            if !response.has_tool_calls() {
                return Ok(match content {
                    Some(text) => {
                        debug!("{} finished after {} iterations", session_id, iteration);
                        RunOutcome::finished(Termination::FinalResponse, Some(text), iteration)
                    }
                    None => {
                        warn!("{}: model returned an empty completion", session_id);
                        RunOutcome::finished(Termination::EmptyCompletion, None, iteration)
                    }
                });
            }

            if let (Some(text), Some(callback)) = (content.as_deref(), on_intermediate) {
                callback(text);
            }

            let results = self
                .executor
                .execute_batch(&response.tool_calls, ctx, &allowed)
                .await;

            for result in results {
                if let ToolEffect::ExpandToolCategories(categories) = &result.effect {
                    for category in categories {
                        if !routed.contains(category) {
                            info!("{}: unlocked category {}", session_id, category);
                            routed.push(category.clone());
                        }
                    }
                }
                self.sessions.append(session_id, result.to_message()).await;
            }
        }

        warn!(
            "{} reached the iteration limit ({})",
            session_id, self.max_iterations
        );
        Ok(RunOutcome::finished(
            Termination::MaxIterations,
            None,
            self.max_iterations,
        ))
    }
}
