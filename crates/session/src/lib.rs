//! Session management for conversation history
//!
//! A [`Session`] is an ordered, bounded message log. The [`SessionStore`]
//! owns every live session; persistence is pluggable through
//! [`SessionPersistence`].

use chrono::{DateTime, Local};
use kestrel_provider::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod persistence;
pub mod store;

pub use persistence::{JsonFilePersistence, SessionPersistence};
pub use store::{SessionStore, SessionSummary};

/// Default cap on stored messages, system messages included
pub const DEFAULT_MAX_MESSAGES: usize = 50;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// A conversation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session key, e.g. `telegram:12345` or `subagent:<id>`
    pub id: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Local>,
    pub last_active: DateTime<Local>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Local::now();
        Self {
            id: id.into(),
            messages: Vec::new(),
            created_at: now,
            last_active: now,
        }
    }

    /// Append a message and enforce the cap
    pub fn push(&mut self, message: Message, max_messages: usize) {
        self.messages.push(message);
        self.last_active = Local::now();
        self.trim(max_messages);
    }

    /// Drop the oldest non-system messages until at most `max_messages` remain
    ///
    /// System messages are never removed. When they alone reach the cap, every
    /// other message goes. Returns the number of messages removed.
    pub fn trim(&mut self, max_messages: usize) -> usize {
        let total = self.messages.len();
        if total <= max_messages {
            return 0;
        }

        let system_count = self.messages.iter().filter(|m| m.is_system()).count();
        let keep_other = max_messages.saturating_sub(system_count);
        let mut to_drop = (total - system_count).saturating_sub(keep_other);

        self.messages.retain(|m| {
            if m.is_system() || to_drop == 0 {
                true
            } else {
                to_drop -= 1;
                false
            }
        });

        let removed = total - self.messages.len();
        debug!("Session {} trimmed by {} message(s)", self.id, removed);
        removed
    }

    /// History suitable for an LLM request
    ///
    /// Trimming can leave tool results whose assistant turn is gone; those
    /// leading tool messages are skipped.
    pub fn llm_history(&self) -> Vec<Message> {
        let mut history = Vec::with_capacity(self.messages.len());
        let mut seen_non_system = false;
        for message in &self.messages {
            if message.is_system() {
                history.push(message.clone());
                continue;
            }
            if !seen_non_system && message.is_tool() {
                continue;
            }
            seen_non_system = true;
            history.push(message.clone());
        }
        history
    }

    pub fn has_system_prompt(&self) -> bool {
        self.messages.iter().any(|m| m.is_system())
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.last_active = Local::now();
    }

    pub fn is_idle_for(&self, ttl: chrono::Duration) -> bool {
        Local::now() - self.last_active > ttl
    }
}
