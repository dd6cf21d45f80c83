//! Inbound message handling and the background pull loop

use kestrel_bus::{InboundMessage, InboundReceiver, MessageBus, OutboundMessage};
use kestrel_config::Config;
use kestrel_provider::{Message, Provider, ToolDefinition};
use kestrel_session::SessionStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::{ContextBuilder, ExecutionContext};
use crate::engine::{ConversationEngine, RunOutcome, Termination};
use crate::executor::ToolExecutor;
use crate::subagent::{QuestionBridge, SubagentCoordinator, TaskRegistry};
use crate::tools::{register_default_tools, ToolRegistry};
use crate::{AgentError, Result};

const NEW_SESSION_COMMANDS: &[&str] = &["/new", "/reset"];
const EMPTY_REPLY: &str = "I finished processing your message but have nothing to add.";

type SessionLock = Arc<tokio::sync::Mutex<()>>;

/// Owns the main conversation engine and turns inbound messages into replies
///
/// Messages for the same session are handled one at a time; different
/// sessions run concurrently.
pub struct AgentRuntime {
    engine: ConversationEngine,
    coordinator: Arc<SubagentCoordinator>,
    registry: Arc<ToolRegistry>,
    context: ContextBuilder,
    bus: MessageBus,
    workspace: PathBuf,
    eager_categories: Vec<String>,
    session_ttl: Duration,
    locks: std::sync::Mutex<HashMap<String, SessionLock>>,
}

impl AgentRuntime {
    pub fn builder() -> AgentRuntimeBuilder {
        AgentRuntimeBuilder::default()
    }

    pub fn engine(&self) -> &ConversationEngine {
        &self.engine
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        self.engine.sessions()
    }

    pub fn coordinator(&self) -> &Arc<SubagentCoordinator> {
        &self.coordinator
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn workspace(&self) -> &PathBuf {
        &self.workspace
    }

    fn session_lock(&self, session_id: &str) -> SessionLock {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(session_id.to_string()).or_default().clone()
    }

    /// Tools the main agent starts every run with
    pub fn base_tools(&self) -> Vec<ToolDefinition> {
        let mut tools = self.registry.base_definitions();
        for category in &self.eager_categories {
            tools.extend(self.registry.category_definitions(category));
        }
        tools
    }

    /// Handle one inbound message and build the reply
    ///
    /// Failures never escape: the user gets an apology carrying the error.
    pub async fn process_message(&self, msg: InboundMessage) -> OutboundMessage {
        let session_id = msg.session_key();
        info!("processing message from {}:{}", msg.channel, msg.sender_id);
        debug!(
            "content: {}",
            msg.content.chars().take(100).collect::<String>()
        );

        let lock = self.session_lock(&session_id);
        let _guard = lock.lock().await;

        let content = match self.handle(&msg, &session_id).await {
            Ok(text) => text,
            Err(e) => {
                error!("failed to process message for {}: {}", session_id, e);
                format!("Sorry, I ran into an error while processing your message: {}", e)
            }
        };

        if let Err(e) = self.sessions().flush(&session_id).await {
            warn!("failed to save session {}: {}", session_id, e);
        }

        let reply = OutboundMessage::new(&msg.channel, &msg.chat_id, content);
        match msg.platform_message_id() {
            Some(id) => reply.reply_to(id),
            None => reply,
        }
    }

    async fn handle(&self, msg: &InboundMessage, session_id: &str) -> Result<String> {
        let sessions = self.sessions();

        if NEW_SESSION_COMMANDS.contains(&msg.content.trim()) {
            sessions.clear(session_id).await?;
            info!("cleared session {}", session_id);
            return Ok("Started a new conversation.".to_string());
        }

        if !sessions.get_or_create(session_id).await.has_system_prompt() {
            let prompt = self.context.build_system_prompt().await;
            sessions.append(session_id, Message::system(prompt)).await;
        }

        let mut content = msg.content.clone();
        for path in &msg.media {
            content.push_str(&format!("\n[attachment: {}]", path));
        }
        sessions.append(session_id, Message::user(content)).await;

        let ctx = ExecutionContext::new(
            &self.workspace,
            &msg.channel,
            &msg.chat_id,
            session_id,
            self.engine.model(),
        )
        .with_message_id(msg.platform_message_id())
        .with_coordinator(Arc::clone(&self.coordinator));

        let outbound = self.bus.outbound_sender();
        let (channel, chat_id) = (msg.channel.clone(), msg.chat_id.clone());
        let on_intermediate: &(dyn Fn(&str) + Send + Sync) = &move |text: &str| {
            if outbound
                .send(OutboundMessage::new(&channel, &chat_id, text))
                .is_err()
            {
                warn!("outbound bus closed; dropped intermediate message");
            }
        };

        let outcome = self
            .engine
            .run(session_id, &self.base_tools(), &ctx, Some(on_intermediate))
            .await?;
        Ok(self.reply_text(outcome))
    }

    fn reply_text(&self, outcome: RunOutcome) -> String {
        match outcome.termination {
            Termination::FinalResponse => outcome.response.unwrap_or_else(|| EMPTY_REPLY.to_string()),
            Termination::EmptyCompletion => EMPTY_REPLY.to_string(),
            Termination::MaxIterations => format!(
                "I couldn't finish this within {} steps, so the task did not complete. \
                 Try splitting it into smaller requests.",
                self.engine.max_iterations()
            ),
        }
    }

    /// Run one prompt outside any channel and return the reply text
    pub async fn process_direct(&self, content: &str, session_id: &str) -> String {
        let msg = InboundMessage::new("cli", "user", "direct", content).with_session_key(session_id);
        self.process_message(msg).await.content
    }

    /// Consume inbound messages until the bus closes or `shutdown` fires
    ///
    /// Each message is handled on its own task.
    pub async fn run(self: Arc<Self>, mut inbound: InboundReceiver, shutdown: CancellationToken) {
        info!("agent runtime started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("agent runtime shutting down");
                    break;
                }
                msg = inbound.recv() => {
                    let Some(msg) = msg else {
                        info!("inbound bus closed");
                        break;
                    };
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        let reply = this.process_message(msg).await;
                        if let Err(e) = this.bus.publish_outbound(reply) {
                            error!("failed to publish reply: {}", e);
                        }
                    });
                }
            }
        }
    }

    /// Periodically drop sessions idle longer than the configured TTL
    pub fn spawn_session_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let period = (this.session_ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(300));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        this.sweep_sessions().await;
                    }
                }
            }
        })
    }

    /// Evict idle sessions now; returns their ids
    pub async fn sweep_sessions(&self) -> Vec<String> {
        let removed = self.sessions().sweep_expired(self.session_ttl).await;
        if !removed.is_empty() {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            for id in &removed {
                if locks.get(id).is_some_and(|l| Arc::strong_count(l) == 1) {
                    locks.remove(id);
                }
            }
            info!("evicted {} idle sessions", removed.len());
        }
        removed
    }
}

/// Assembles an [`AgentRuntime`]
///
/// A provider and a message bus are required. Everything else falls back to
/// the config (or its defaults).
#[derive(Default)]
pub struct AgentRuntimeBuilder {
    config: Option<Config>,
    provider: Option<Arc<dyn Provider>>,
    bus: Option<MessageBus>,
    registry: Option<ToolRegistry>,
    sessions: Option<Arc<SessionStore>>,
    workspace: Option<PathBuf>,
    tasks: Option<Arc<TaskRegistry>>,
    bridge: Option<Arc<QuestionBridge>>,
}

impl AgentRuntimeBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn bus(mut self, bus: MessageBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Use a custom tool registry instead of the built-in tools
    pub fn registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn tasks(mut self, tasks: Arc<TaskRegistry>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn bridge(mut self, bridge: Arc<QuestionBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn build(self) -> Result<AgentRuntime> {
        let config = self.config.unwrap_or_default();
        let provider = self.provider.ok_or(AgentError::MissingDependency("provider"))?;
        let bus = self.bus.ok_or(AgentError::MissingDependency("message bus"))?;
        let workspace = self.workspace.unwrap_or_else(|| config.workspace_path());

        let registry = Arc::new(self.registry.unwrap_or_else(|| {
            let mut registry = ToolRegistry::new();
            register_default_tools(&mut registry, &config, &workspace, bus.outbound_sender());
            registry
        }));
        let sessions = self
            .sessions
            .unwrap_or_else(|| Arc::new(SessionStore::new(config.max_messages_per_session())));

        let executor = Arc::new(
            ToolExecutor::new(Arc::clone(&registry))
                .with_call_timeout(config.tools.call_timeout_secs.map(Duration::from_secs)),
        );
        let engine = ConversationEngine::new(provider, sessions, executor)
            .with_model(config.default_model())
            .with_max_iterations(config.max_agent_iterations() as usize)
            .with_max_tokens(config.agent.max_tokens)
            .with_temperature(config.agent.temperature);

        let coordinator = SubagentCoordinator::from_settings(
            engine.clone(),
            self.tasks.unwrap_or_default(),
            self.bridge.unwrap_or_default(),
            &config.subagents,
        )
        .with_inbound(bus.inbound_sender());

        let eager_categories = config
            .agent
            .eager_categories
            .iter()
            .filter(|c| {
                let known = registry.has_category(c);
                if !known {
                    warn!("ignoring unknown eager category {}", c);
                }
                known
            })
            .cloned()
            .collect();

        Ok(AgentRuntime {
            engine,
            coordinator: Arc::new(coordinator),
            registry,
            context: ContextBuilder::new(&workspace),
            bus,
            workspace,
            eager_categories,
            session_ttl: Duration::from_secs(config.agent.session_ttl_secs.max(1)),
            locks: std::sync::Mutex::new(HashMap::new()),
        })
    }
}
