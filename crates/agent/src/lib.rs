//! Agent core: tools, the conversation engine, subagents and the runtime
//!
//! Layering, leaf first:
//! - [`tools`]: the [`Tool`] trait, built-in tools and the categorized registry
//! - [`executor`]: allow-list enforcement and isolated (batch) execution
//! - [`engine`]: the bounded LLM/tool iteration loop
//! - [`subagent`]: delegated runs, task tracking and the question bridge
//! - [`runtime`]: inbound message handling and the pull loop

use thiserror::Error;

pub mod context;
pub mod engine;
pub mod executor;
pub mod runtime;
pub mod subagent;
pub mod tools;

pub use context::{ContextBuilder, ExecutionContext};
pub use engine::{ConversationEngine, RunOutcome, Termination};
pub use executor::{AllowedToolSet, ToolEffect, ToolExecutionResult, ToolExecutor};
pub use runtime::{AgentRuntime, AgentRuntimeBuilder};
pub use subagent::{
    AgentProfile, ChatReply, LaunchReceipt, QuestionBridge, SubagentCoordinator, Task,
    TaskRegistry, TaskStatus,
};
pub use tools::{Tool, ToolContent, ToolError, ToolOutput, ToolRegistry};

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM request failed: {0}")]
    LlmRequestFailed(String),

    #[error("ask_main_agent can only be used from inside a subagent")]
    NotInSubagentContext,

    #[error("unknown subagent: {0}")]
    UnknownSubagent(String),

    #[error("subagent {0} is still working; wait for it to finish or ask a question")]
    SubagentBusy(String),

    #[error("unknown agent type '{0}'")]
    UnknownAgentType(String),

    #[error("no answer from the main agent within {0}s")]
    QuestionTimedOut(u64),

    #[error("question to the main agent was withdrawn")]
    QuestionCancelled,

    #[error("still waiting for the main agent to answer \"{0}\"; ask one question at a time")]
    QuestionPending(String),

    #[error("runtime is missing its {0}")]
    MissingDependency(&'static str),

    #[error("session error: {0}")]
    Session(#[from] kestrel_session::SessionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
