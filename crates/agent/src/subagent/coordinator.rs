//! Launching, resuming and answering subagents

use futures::FutureExt;
use kestrel_bus::{InboundMessage, InboundSender};
use kestrel_provider::{Message, ToolDefinition};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{AgentProfile, QuestionBridge, Task, TaskRegistry, TaskStatus};
use crate::context::ExecutionContext;
use crate::engine::ConversationEngine;
use crate::{AgentError, Result};

/// Name of the delegation tool; never handed to a subagent
pub const DELEGATION_TOOL: &str = "subagent";
/// Name of the internal question tool every subagent gets
pub const ASK_TOOL: &str = "ask_main_agent";
/// Direct user messaging; subagents report through their caller instead
pub const OUTBOUND_TOOL: &str = "send_message";

/// How a finished run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunResult {
    Completed(Option<String>),
    /// Hit the iteration limit
    TimedOut,
    Failed(String),
}

/// What a subagent is doing right now
#[derive(Debug, Clone, PartialEq)]
pub enum SubagentPhase {
    Running,
    AwaitingAnswer(String),
    Finished(RunResult),
}

/// Where results and questions of the current run go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Published to the caller's session through the bus
    Announce,
    /// Returned from the `chat` call that resumed the run
    Caller,
}

struct SubagentHandle {
    profile: AgentProfile,
    session_id: String,
    ctx: ExecutionContext,
    phase: watch::Sender<SubagentPhase>,
    delivery: Delivery,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchReceipt {
    pub subagent_id: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub subagent_id: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    pub name: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub timed_out: bool,
    /// Set when the subagent stopped to ask something
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Spawns isolated engine runs and relays questions back to the main agent
///
/// Each subagent gets its own `subagent:<id>` session and a tool list built
/// from its profile's categories plus `ask_main_agent`. The delegation tool
/// and everything on the denylist are stripped.
pub struct SubagentCoordinator {
    engine: ConversationEngine,
    tasks: Arc<TaskRegistry>,
    bridge: Arc<QuestionBridge>,
    profiles: HashMap<String, AgentProfile>,
    handles: Mutex<HashMap<String, SubagentHandle>>,
    denylist: HashSet<String>,
    ask_timeout: Duration,
    max_retained: usize,
    inbound: Option<InboundSender>,
}

impl SubagentCoordinator {
    pub fn new(
        engine: ConversationEngine,
        tasks: Arc<TaskRegistry>,
        bridge: Arc<QuestionBridge>,
    ) -> Self {
        Self {
            engine,
            tasks,
            bridge,
            profiles: AgentProfile::builtin()
                .into_iter()
                .map(|p| (p.agent_type.clone(), p))
                .collect(),
            handles: Mutex::new(HashMap::new()),
            denylist: HashSet::from([OUTBOUND_TOOL.to_string()]),
            ask_timeout: Duration::from_secs(300),
            max_retained: 100,
            inbound: None,
        }
    }

    /// Build from the `subagents` config section
    pub fn from_settings(
        engine: ConversationEngine,
        tasks: Arc<TaskRegistry>,
        bridge: Arc<QuestionBridge>,
        settings: &kestrel_config::SubagentSettings,
    ) -> Self {
        Self::new(
            engine.with_max_iterations(settings.max_iterations as usize),
            tasks,
            bridge,
        )
        .with_denylist(settings.denylist.iter().cloned())
        .with_ask_timeout(Duration::from_secs(settings.ask_timeout_secs))
        .with_max_retained(settings.max_retained_tasks)
    }

    pub fn with_profile(mut self, profile: AgentProfile) -> Self {
        self.profiles.insert(profile.agent_type.clone(), profile);
        self
    }

    /// Tools withheld from subagents, on top of the outbound-message tool
    pub fn with_denylist(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.denylist = names
            .into_iter()
            .chain(std::iter::once(OUTBOUND_TOOL.to_string()))
            .collect();
        self
    }

    pub fn with_ask_timeout(mut self, timeout: Duration) -> Self {
        self.ask_timeout = timeout;
        self
    }

    pub fn with_max_retained(mut self, max_retained: usize) -> Self {
        self.max_retained = max_retained;
        self
    }

    /// Announce results and questions of launched subagents on the bus
    pub fn with_inbound(mut self, inbound: InboundSender) -> Self {
        self.inbound = Some(inbound);
        self
    }

    /// The engine subagent runs use; shares the main agent's sessions
    pub fn engine(&self) -> &ConversationEngine {
        &self.engine
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    pub fn bridge(&self) -> &Arc<QuestionBridge> {
        &self.bridge
    }

    /// Known agent types, sorted
    pub fn agent_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.profiles.keys().cloned().collect();
        types.sort();
        types
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<String, SubagentHandle>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Tool definitions a subagent of `profile` runs with
    pub fn subagent_tools(&self, profile: &AgentProfile) -> Vec<ToolDefinition> {
        let registry = self.engine.executor().registry();
        let mut seen = HashSet::new();
        profile
            .categories
            .iter()
            .flat_map(|category| registry.category_definitions(category))
            .chain(registry.definition(ASK_TOOL))
            .filter(|def| def.name != DELEGATION_TOOL && !self.denylist.contains(&def.name))
            .filter(|def| seen.insert(def.name.clone()))
            .collect()
    }

    /// Start a subagent in the background
    pub async fn launch(
        self: &Arc<Self>,
        agent_type: &str,
        prompt: &str,
        caller: &ExecutionContext,
    ) -> Result<LaunchReceipt> {
        let profile = self
            .profiles
            .get(agent_type)
            .cloned()
            .ok_or_else(|| AgentError::UnknownAgentType(agent_type.to_string()))?;

        let id: String = uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect();
        let session_id = format!("subagent:{}", id);

        self.engine
            .sessions()
            .append_all(
                &session_id,
                [
                    Message::system(&profile.system_prompt),
                    Message::user(prompt),
                ],
            )
            .await;

        self.tasks.register(Task::new(
            &id,
            &profile.agent_type,
            &profile.name,
            &session_id,
            &caller.session_id,
            prompt,
        ));

        let mut ctx = caller.for_subagent(&id, &session_id);
        ctx.coordinator = None;
        let (phase, _) = watch::channel(SubagentPhase::Running);

        let receipt = LaunchReceipt {
            subagent_id: id.clone(),
            agent_type: profile.agent_type.clone(),
            name: profile.name.clone(),
            status: "started".to_string(),
        };

        self.handles().insert(
            id.clone(),
            SubagentHandle {
                profile,
                session_id,
                ctx,
                phase,
                delivery: Delivery::Announce,
            },
        );

        info!(
            "launched {} subagent {} for {}",
            receipt.agent_type, id, caller.session_id
        );
        self.spawn_run(id);
        Ok(receipt)
    }

    /// Send `prompt` to a subagent and wait until it finishes or asks something
    ///
    /// A subagent blocked in `ask_main_agent` receives `prompt` as the answer.
    /// A finished one gets it as a new user message and runs again.
    pub async fn chat(self: &Arc<Self>, subagent_id: &str, prompt: &str) -> Result<ChatReply> {
        let (mut rx, restart_session) = {
            let mut handles = self.handles();
            let handle = handles
                .get_mut(subagent_id)
                .ok_or_else(|| AgentError::UnknownSubagent(subagent_id.to_string()))?;

            let current = handle.phase.borrow().clone();
            let restart_session = match current {
                SubagentPhase::Running => {
                    return Err(AgentError::SubagentBusy(subagent_id.to_string()))
                }
                SubagentPhase::AwaitingAnswer(_) => None,
                SubagentPhase::Finished(_) => Some(handle.session_id.clone()),
            };
            handle.delivery = Delivery::Caller;
            handle.phase.send_replace(SubagentPhase::Running);
            (handle.phase.subscribe(), restart_session)
        };

        match restart_session {
            None => {
                debug!("answering subagent {}", subagent_id);
                if !self.bridge.answer(subagent_id, prompt) {
                    warn!(
                        "subagent {} stopped waiting before the answer arrived",
                        subagent_id
                    );
                }
            }
            Some(session_id) => {
                debug!("resuming subagent {}", subagent_id);
                self.tasks.reopen(subagent_id, prompt);
                self.engine
                    .sessions()
                    .append(&session_id, Message::user(prompt))
                    .await;
                self.spawn_run(subagent_id.to_string());
            }
        }

        let phase = match rx.wait_for(|p| *p != SubagentPhase::Running).await {
            Ok(phase) => SubagentPhase::clone(&phase),
            Err(_) => SubagentPhase::Finished(RunResult::Failed("subagent is gone".to_string())),
        };
        Ok(self.reply(subagent_id, phase))
    }

    /// Block the calling subagent until the main agent answers `question`
    ///
    /// The task stays `running` while it waits.
    pub async fn ask_main_agent(&self, ctx: &ExecutionContext, question: &str) -> Result<String> {
        let subagent_id = ctx
            .subagent_id
            .as_deref()
            .ok_or(AgentError::NotInSubagentContext)?;

        let rx = self
            .bridge
            .register(subagent_id, question)
            .map_err(AgentError::QuestionPending)?;
        let announce = {
            let handles = self.handles();
            let Some(handle) = handles.get(subagent_id) else {
                self.bridge.cancel(subagent_id);
                return Err(AgentError::UnknownSubagent(subagent_id.to_string()));
            };
            handle
                .phase
                .send_replace(SubagentPhase::AwaitingAnswer(question.to_string()));
            handle.delivery == Delivery::Announce
        };

        info!("subagent {} asks: {}", subagent_id, question);
        if announce {
            self.announce(
                subagent_id,
                format!(
                    "asks: {}\n\nAnswer with the subagent tool: action \"chat\", subagent_id \"{}\", prompt = your answer.",
                    question, subagent_id
                ),
            );
        }

        match tokio::time::timeout(self.ask_timeout, rx).await {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(_)) => {
                self.resume_running(subagent_id);
                Err(AgentError::QuestionCancelled)
            }
            Err(_) => {
                warn!(
                    "subagent {} got no answer within {}s",
                    subagent_id,
                    self.ask_timeout.as_secs()
                );
                self.bridge.cancel(subagent_id);
                self.resume_running(subagent_id);
                Err(AgentError::QuestionTimedOut(self.ask_timeout.as_secs()))
            }
        }
    }

    pub fn status(&self, subagent_id: &str) -> Option<Task> {
        self.tasks.get(subagent_id)
    }

    pub fn list(&self) -> Vec<Task> {
        self.tasks.get_all()
    }

    /// Current phase of a subagent
    pub fn phase(&self, subagent_id: &str) -> Option<SubagentPhase> {
        self.handles()
            .get(subagent_id)
            .map(|h| h.phase.borrow().clone())
    }

    /// Resolves once the subagent leaves the running phase
    pub async fn wait_idle(&self, subagent_id: &str) -> Option<SubagentPhase> {
        let mut rx = self.handles().get(subagent_id)?.phase.subscribe();
        let phase = rx.wait_for(|p| *p != SubagentPhase::Running).await.ok()?;
        Some(SubagentPhase::clone(&phase))
    }

    fn resume_running(&self, subagent_id: &str) {
        if self.bridge.pending(subagent_id).is_some() {
            return;
        }
        if let Some(handle) = self.handles().get(subagent_id) {
            handle.phase.send_if_modified(|phase| {
                if matches!(phase, SubagentPhase::AwaitingAnswer(_)) {
                    *phase = SubagentPhase::Running;
                    true
                } else {
                    false
                }
            });
        }
    }

    fn spawn_run(self: &Arc<Self>, subagent_id: String) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.drive(&subagent_id).await });
    }

    async fn drive(self: Arc<Self>, subagent_id: &str) {
        let prepared = {
            let handles = self.handles();
            handles.get(subagent_id).map(|h| {
                (
                    h.session_id.clone(),
                    h.ctx.clone().with_coordinator(Arc::clone(&self)),
                    self.subagent_tools(&h.profile),
                )
            })
        };
        let Some((session_id, ctx, tools)) = prepared else {
            warn!("subagent {} vanished before it could run", subagent_id);
            return;
        };

        let outcome = AssertUnwindSafe(self.engine.run(&session_id, &tools, &ctx, None))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(run)) if run.reached_max_iterations => {
                self.tasks.fail(
                    subagent_id,
                    format!(
                        "timed out: reached the iteration limit ({}) before finishing",
                        self.engine.max_iterations()
                    ),
                );
                RunResult::TimedOut
            }
            Ok(Ok(run)) => {
                self.tasks
                    .complete(subagent_id, run.response.clone().unwrap_or_default());
                RunResult::Completed(run.response)
            }
            Ok(Err(e)) => {
                self.tasks.fail(subagent_id, e.to_string());
                RunResult::Failed(e.to_string())
            }
            Err(_) => {
                let reason = "subagent run panicked".to_string();
                self.tasks.fail(subagent_id, &reason);
                RunResult::Failed(reason)
            }
        };
        info!("subagent {} finished: {:?}", subagent_id, result);

        let delivery = {
            let handles = self.handles();
            handles.get(subagent_id).map(|h| {
                h.phase.send_replace(SubagentPhase::Finished(result.clone()));
                h.delivery
            })
        };

        if delivery == Some(Delivery::Announce) {
            let text = match &result {
                RunResult::Completed(Some(response)) => format!("finished:\n\n{}", response),
                RunResult::Completed(None) => "finished without a result.".to_string(),
                RunResult::TimedOut => {
                    "stopped: it reached its iteration limit before finishing.".to_string()
                }
                RunResult::Failed(e) => format!("failed: {}", e),
            };
            self.announce(subagent_id, text);
        }

        self.evict_finished().await;
    }

    /// Publish a note about a subagent into its caller's session
    fn announce(&self, subagent_id: &str, text: String) {
        let Some(inbound) = &self.inbound else {
            return;
        };
        let msg = {
            let handles = self.handles();
            let Some(handle) = handles.get(subagent_id) else {
                return;
            };
            let caller_session = self
                .tasks
                .get(subagent_id)
                .map(|t| t.caller_session_id)
                .unwrap_or_else(|| format!("{}:{}", handle.ctx.channel, handle.ctx.chat_id));
            InboundMessage::new(
                &handle.ctx.channel,
                format!("subagent:{}", subagent_id),
                &handle.ctx.chat_id,
                format!(
                    "[Subagent {} ({}, id {})] {}",
                    handle.profile.name, handle.profile.agent_type, subagent_id, text
                ),
            )
            .with_session_key(caller_session)
            .with_metadata("subagent_id", subagent_id)
        };
        if inbound.send(msg).is_err() {
            warn!("inbound bus closed; dropped note from subagent {}", subagent_id);
        }
    }

    async fn evict_finished(&self) {
        let evicted = self.tasks.evict(self.max_retained);
        for task in evicted {
            self.handles().remove(&task.agent_id);
            if let Err(e) = self.engine.sessions().remove(&task.session_id).await {
                warn!("failed to remove session {}: {}", task.session_id, e);
            }
            debug!("evicted subagent {}", task.agent_id);
        }
    }

    fn reply(&self, subagent_id: &str, phase: SubagentPhase) -> ChatReply {
        let (agent_type, name) = self
            .handles()
            .get(subagent_id)
            .map(|h| (h.profile.agent_type.clone(), h.profile.name.clone()))
            .unwrap_or_default();

        let mut reply = ChatReply {
            subagent_id: subagent_id.to_string(),
            agent_type,
            name,
            status: TaskStatus::Running,
            response: None,
            timed_out: false,
            question: None,
            error: None,
        };
        match phase {
            SubagentPhase::Running => {}
            SubagentPhase::AwaitingAnswer(question) => reply.question = Some(question),
            SubagentPhase::Finished(RunResult::Completed(response)) => {
                reply.status = TaskStatus::Completed;
                reply.response = response;
            }
            SubagentPhase::Finished(RunResult::TimedOut) => {
                reply.status = TaskStatus::Failed;
                reply.timed_out = true;
                reply.error = Some("reached the iteration limit before finishing".to_string());
            }
            SubagentPhase::Finished(RunResult::Failed(e)) => {
                reply.status = TaskStatus::Failed;
                reply.error = Some(e);
            }
        }
        reply
    }
}
