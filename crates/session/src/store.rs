//! In-memory session store with optional write-through persistence

use crate::{Result, Session, SessionPersistence, DEFAULT_MAX_MESSAGES};
use chrono::{DateTime, Local};
use kestrel_provider::Message;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Listing entry for a session
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: String,
    pub message_count: usize,
    pub last_active: DateTime<Local>,
    /// Present in memory (as opposed to only on disk)
    pub loaded: bool,
}

/// Owner of every live conversation
///
/// All appends go through here so the message cap is enforced in one place.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    persistence: Option<Arc<dyn SessionPersistence>>,
    max_messages: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

impl SessionStore {
    /// Memory-only store
    pub fn new(max_messages: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            persistence: None,
            max_messages: max_messages.max(1),
        }
    }

    /// Store backed by `persistence`
    pub fn with_persistence(max_messages: usize, persistence: Arc<dyn SessionPersistence>) -> Self {
        Self {
            persistence: Some(persistence),
            ..Self::new(max_messages)
        }
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    async fn load_into<'a>(
        &self,
        sessions: &'a mut HashMap<String, Session>,
        id: &str,
    ) -> &'a mut Session {
        if !sessions.contains_key(id) {
            let mut session = match &self.persistence {
                Some(p) => match p.load(id).await {
                    Ok(Some(session)) => session,
                    Ok(None) => Session::new(id),
                    Err(e) => {
                        warn!("Failed to load session {}: {}, starting fresh", id, e);
                        Session::new(id)
                    }
                },
                None => Session::new(id),
            };
            session.trim(self.max_messages);
            sessions.insert(id.to_string(), session);
        }
        sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id))
    }

    /// Snapshot of a session, creating it if needed
    pub async fn get_or_create(&self, id: &str) -> Session {
        let mut sessions = self.sessions.lock().await;
        self.load_into(&mut sessions, id).await.clone()
    }

    /// Append one message, trimming the oldest non-system messages past the cap
    pub async fn append(&self, id: &str, message: Message) {
        let mut sessions = self.sessions.lock().await;
        let max = self.max_messages;
        self.load_into(&mut sessions, id).await.push(message, max);
    }

    /// Append several messages in order
    pub async fn append_all(&self, id: &str, messages: impl IntoIterator<Item = Message>) {
        let mut sessions = self.sessions.lock().await;
        let max = self.max_messages;
        let session = self.load_into(&mut sessions, id).await;
        for message in messages {
            session.push(message, max);
        }
    }

    /// Full stored history
    pub async fn messages(&self, id: &str) -> Vec<Message> {
        let mut sessions = self.sessions.lock().await;
        self.load_into(&mut sessions, id).await.messages.clone()
    }

    /// History to send to the LLM
    pub async fn llm_history(&self, id: &str) -> Vec<Message> {
        let mut sessions = self.sessions.lock().await;
        self.load_into(&mut sessions, id).await.llm_history()
    }

    /// Empty a session's history; the session itself stays
    pub async fn clear(&self, id: &str) -> Result<()> {
        let snapshot = {
            let mut sessions = self.sessions.lock().await;
            let session = self.load_into(&mut sessions, id).await;
            session.clear();
            session.clone()
        };
        if let Some(p) = &self.persistence {
            p.save(&snapshot).await?;
        }
        info!("Cleared session {}", id);
        Ok(())
    }

    /// Forget a session in memory and on disk
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let in_memory = self.sessions.lock().await.remove(id).is_some();
        let on_disk = match &self.persistence {
            Some(p) => p.delete(id).await?,
            None => false,
        };
        Ok(in_memory || on_disk)
    }

    /// Write a session through to persistence
    pub async fn flush(&self, id: &str) -> Result<()> {
        let Some(p) = &self.persistence else {
            return Ok(());
        };
        let snapshot = self.sessions.lock().await.get(id).cloned();
        if let Some(session) = snapshot {
            p.save(&session).await?;
        }
        Ok(())
    }

    /// Evict sessions idle longer than `ttl` from memory, flushing them first
    pub async fn sweep_expired(&self, ttl: Duration) -> Vec<String> {
        let ttl = match chrono::Duration::from_std(ttl) {
            Ok(ttl) => ttl,
            Err(_) => return Vec::new(),
        };

        let expired: Vec<Session> = {
            let mut sessions = self.sessions.lock().await;
            let ids: Vec<String> = sessions
                .values()
                .filter(|s| s.is_idle_for(ttl))
                .map(|s| s.id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        let mut evicted = Vec::with_capacity(expired.len());
        for session in expired {
            if let Some(p) = &self.persistence {
                if let Err(e) = p.save(&session).await {
                    warn!("Failed to save expiring session {}: {}", session.id, e);
                }
            }
            debug!("Evicted idle session {}", session.id);
            evicted.push(session.id);
        }
        evicted
    }

    /// Every known session, in memory or persisted
    pub async fn list(&self) -> Result<Vec<SessionSummary>> {
        let mut by_id: HashMap<String, SessionSummary> = HashMap::new();

        if let Some(p) = &self.persistence {
            for session in p.list().await? {
                by_id.insert(
                    session.id.clone(),
                    SessionSummary {
                        id: session.id,
                        message_count: session.messages.len(),
                        last_active: session.last_active,
                        loaded: false,
                    },
                );
            }
        }

        for session in self.sessions.lock().await.values() {
            by_id.insert(
                session.id.clone(),
                SessionSummary {
                    id: session.id.clone(),
                    message_count: session.messages.len(),
                    last_active: session.last_active,
                    loaded: true,
                },
            );
        }

        let mut summaries: Vec<_> = by_id.into_values().collect();
        summaries.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        Ok(summaries)
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.lock().await.contains_key(id)
    }

    /// Number of sessions held in memory
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
