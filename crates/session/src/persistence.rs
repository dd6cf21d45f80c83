//! Durable storage for sessions

use crate::{Result, Session};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Backing store behind [`crate::SessionStore`]
///
/// Trimming is enforced by the store before anything reaches this layer.
#[async_trait]
pub trait SessionPersistence: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Session>>;
    async fn save(&self, session: &Session) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn list(&self) -> Result<Vec<Session>>;
}

/// One pretty-printed JSON file per session
pub struct JsonFilePersistence {
    dir: PathBuf,
}

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_\-]").expect("valid regex"))
}

impl JsonFilePersistence {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for a session key; unsafe characters become `_`
    pub fn session_path(&self, id: &str) -> PathBuf {
        let safe = unsafe_chars().replace_all(id, "_");
        let safe = if safe.is_empty() { "_".into() } else { safe };
        self.dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl SessionPersistence for JsonFilePersistence {
    async fn load(&self, id: &str) -> Result<Option<Session>> {
        let path = self.session_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        let session: Session = serde_json::from_str(&content)?;
        debug!("Loaded session {}", id);
        Ok(Some(session))
    }

    async fn save(&self, session: &Session) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let content = serde_json::to_string_pretty(session)?;
        tokio::fs::write(self.session_path(&session.id), content).await?;
        debug!("Saved session {}", session.id);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let path = self.session_path(id);
        if path.exists() {
            tokio::fs::remove_file(path).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn list(&self) -> Result<Vec<Session>> {
        let mut sessions = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<Session>(&content) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!("Skipping unreadable session file {:?}: {}", path, e),
            }
        }

        Ok(sessions)
    }
}
