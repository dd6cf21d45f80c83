//! Message bus between chat channels and the agent runtime
//!
//! Channels publish [`InboundMessage`]s; the runtime pulls them, and every
//! reply, intermediate update or subagent notification travels back as an
//! [`OutboundMessage`] routed by channel name.

use chrono::{DateTime, Local};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// A message arriving from a chat channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Unique id assigned on creation
    pub id: String,
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    pub timestamp: DateTime<Local>,
    /// Explicit session override; defaults to `channel:chat_id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    /// Local paths of attachments
    #[serde(default)]
    pub media: Vec<String>,
    /// Channel specific extras (e.g. the platform message id)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: Local::now(),
            session_key: None,
            media: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Session this message belongs to
    pub fn session_key(&self) -> String {
        match &self.session_key {
            Some(key) => key.clone(),
            None => format!("{}:{}", self.channel, self.chat_id),
        }
    }

    /// Route the message into an explicit session
    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = Some(key.into());
        self
    }

    pub fn with_media(mut self, path: impl Into<String>) -> Self {
        self.media.push(path.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.metadata.insert(key.into(), value);
        }
        self
    }

    /// Platform message id, if the channel supplied one
    pub fn platform_message_id(&self) -> Option<String> {
        self.metadata.get("message_id").map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// A message headed back out to a chat channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    /// Platform message id to reply to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Local file to send as an attachment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
            file: None,
            metadata: HashMap::new(),
        }
    }

    pub fn reply_to(mut self, msg_id: impl Into<String>) -> Self {
        self.reply_to = Some(msg_id.into());
        self
    }

    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.metadata.insert(key.into(), value);
        }
        self
    }
}

pub type InboundSender = mpsc::UnboundedSender<InboundMessage>;
pub type InboundReceiver = mpsc::UnboundedReceiver<InboundMessage>;
pub type OutboundSender = mpsc::UnboundedSender<OutboundMessage>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<OutboundMessage>;

/// Cloneable handle for publishing in both directions
#[derive(Debug, Clone)]
pub struct MessageBus {
    inbound: InboundSender,
    outbound: OutboundSender,
}

impl MessageBus {
    pub fn new(inbound: InboundSender, outbound: OutboundSender) -> Self {
        Self { inbound, outbound }
    }

    /// Create a bus together with its two receiving ends
    pub fn channels() -> (Self, InboundReceiver, OutboundReceiver) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        (Self::new(in_tx, out_tx), in_rx, out_rx)
    }

    #[allow(clippy::result_large_err)]
    pub fn publish_inbound(
        &self,
        msg: InboundMessage,
    ) -> Result<(), mpsc::error::SendError<InboundMessage>> {
        trace!("inbound {} from {}", msg.channel, msg.sender_id);
        self.inbound.send(msg)
    }

    #[allow(clippy::result_large_err)]
    pub fn publish_outbound(
        &self,
        msg: OutboundMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        trace!("outbound {} -> {}", msg.channel, msg.chat_id);
        self.outbound.send(msg)
    }

    pub fn inbound_sender(&self) -> InboundSender {
        self.inbound.clone()
    }

    pub fn outbound_sender(&self) -> OutboundSender {
        self.outbound.clone()
    }
}

type Handler = Arc<dyn Fn(OutboundMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Routes outbound messages to per-channel async handlers
pub struct OutboundDispatcher {
    receiver: OutboundReceiver,
    handlers: HashMap<String, Handler>,
}

impl OutboundDispatcher {
    pub fn new(receiver: OutboundReceiver) -> Self {
        Self {
            receiver,
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for one channel, replacing any previous one
    pub fn on_channel<F, Fut>(&mut self, channel: impl Into<String>, handler: F)
    where
        F: Fn(OutboundMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |msg| Box::pin(handler(msg)));
        self.handlers.insert(channel.into(), handler);
    }

    pub fn has_handler(&self, channel: &str) -> bool {
        self.handlers.contains_key(channel)
    }

    /// Deliver messages in arrival order until every sender is dropped
    ///
    /// Handlers for one channel run sequentially so replies keep their order.
    pub async fn run(mut self) {
        debug!("Outbound dispatcher started");

        while let Some(msg) = self.receiver.recv().await {
            match self.handlers.get(&msg.channel) {
                Some(handler) => handler(msg).await,
                None => warn!("No handler for channel '{}', dropping message", msg.channel),
            }
        }

        debug!("Outbound dispatcher stopped");
    }
}
