//! Filesystem locations used by kestrel

use std::path::{Path, PathBuf};

/// Root data directory (~/.kestrel), falling back to ./.kestrel without a home
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kestrel")
}

/// Config file location
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

/// Default agent workspace
pub fn workspace_path() -> PathBuf {
    data_dir().join("workspace")
}

/// Persisted conversation sessions
pub fn sessions_dir() -> PathBuf {
    data_dir().join("sessions")
}

/// Scheduled job store
pub fn cron_store_path() -> PathBuf {
    data_dir().join("cron").join("jobs.json")
}

/// Downloaded chat attachments
pub fn media_dir() -> PathBuf {
    data_dir().join("media")
}

/// Expand a leading `~` against the home directory
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Create a directory and its parents
pub async fn ensure_dir(path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(path).await
}
