//! Runs fired cron jobs against the agent

use async_trait::async_trait;
use kestrel_agent::AgentRuntime;
use kestrel_bus::{InboundMessage, MessageBus};
use kestrel_cron::{Job, JobRunner, RunnerError};
use std::sync::Arc;
use tracing::{debug, info};

/// Sender id of messages injected by scheduled jobs
pub const CRON_SENDER: &str = "cron";

pub struct AgentJobRunner {
    runtime: Arc<AgentRuntime>,
    bus: MessageBus,
}

impl AgentJobRunner {
    pub fn new(runtime: Arc<AgentRuntime>, bus: MessageBus) -> Self {
        Self { runtime, bus }
    }
}

#[async_trait]
impl JobRunner for AgentJobRunner {
    /// Delivered jobs enter the target chat as an inbound message, so the
    /// reply lands there through the normal loop. Others run privately in the
    /// job's own session.
    async fn run(&self, job: &Job) -> Result<(), RunnerError> {
        if let Some((channel, to)) = job.payload.target() {
            let msg = InboundMessage::new(channel, CRON_SENDER, to, job.payload.message.as_str());
            self.bus
                .publish_inbound(msg)
                .map_err(|_| "inbound bus closed")?;
            info!("cron job {} queued for {}:{}", job.id, channel, to);
            return Ok(());
        }

        let reply = self
            .runtime
            .process_direct(&job.payload.message, &job.session_id())
            .await;
        debug!("cron job {} replied: {}", job.id, reply);
        Ok(())
    }
}
