//! Chat channels (Telegram)

use async_trait::async_trait;
use kestrel_bus::OutboundMessage;
use thiserror::Error;

pub mod telegram;

pub use telegram::TelegramChannel;

/// Channel errors
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("invalid chat id: {0}")]
    InvalidChatId(String),

    #[error("attachment not found: {0}")]
    MissingAttachment(String),

    #[error("telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("download failed: {0}")]
    Download(#[from] teloxide::DownloadError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// A chat platform connected to the message bus
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Receive messages and publish them inbound; returns when the channel stops
    async fn start(&mut self) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    /// Deliver one outbound message
    async fn send(&self, msg: &OutboundMessage) -> Result<()>;

    /// Whether `sender_id` may talk to the agent
    fn is_allowed(&self, sender_id: &str) -> bool;
}
