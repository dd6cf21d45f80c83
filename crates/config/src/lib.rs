//! Configuration for the kestrel agent runtime
//!
//! A single JSON document at `~/.kestrel/config.json`. Every field has a
//! default so a partial (or missing) file always loads.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod paths;

pub use paths::{config_path, cron_store_path, data_dir, media_dir, sessions_dir, workspace_path};

/// Errors raised while loading or saving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config not found: {0}")]
    NotFound(PathBuf),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Default model used when nothing is configured
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";
/// Iteration cap for one conversation run
pub const DEFAULT_MAX_AGENT_ITERATIONS: u32 = 15;
/// Message cap for one session (system messages included)
pub const DEFAULT_MAX_MESSAGES_PER_SESSION: usize = 50;

/// Main agent behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_agent_iterations")]
    pub max_agent_iterations: u32,
    #[serde(default = "default_max_messages_per_session")]
    pub max_messages_per_session: usize,
    /// Idle sessions older than this are evicted from memory; 0 disables the sweep
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Tool categories exposed from the first iteration, without routing
    #[serde(default)]
    pub eager_categories: Vec<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_agent_iterations: default_max_agent_iterations(),
            max_messages_per_session: default_max_messages_per_session(),
            session_ttl_secs: default_session_ttl_secs(),
            eager_categories: Vec::new(),
        }
    }
}

fn default_workspace() -> String {
    "~/.kestrel/workspace".to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_agent_iterations() -> u32 {
    DEFAULT_MAX_AGENT_ITERATIONS
}

fn default_max_messages_per_session() -> usize {
    DEFAULT_MAX_MESSAGES_PER_SESSION
}

fn default_session_ttl_secs() -> u64 {
    24 * 60 * 60
}

/// Delegation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentSettings {
    /// Tool names never handed to a subagent
    #[serde(default = "default_denylist")]
    pub denylist: Vec<String>,
    /// How long a subagent waits for the main agent to answer; 0 waits forever
    #[serde(default = "default_ask_timeout_secs")]
    pub ask_timeout_secs: u64,
    /// Finished task records kept for inspection
    #[serde(default = "default_max_retained_tasks")]
    pub max_retained_tasks: usize,
    #[serde(default = "default_max_agent_iterations")]
    pub max_iterations: u32,
}

impl Default for SubagentSettings {
    fn default() -> Self {
        Self {
            denylist: default_denylist(),
            ask_timeout_secs: default_ask_timeout_secs(),
            max_retained_tasks: default_max_retained_tasks(),
            max_iterations: default_max_agent_iterations(),
        }
    }
}

fn default_denylist() -> Vec<String> {
    vec!["subagent".to_string(), "send_message".to_string()]
}

fn default_ask_timeout_secs() -> u64 {
    300
}

fn default_max_retained_tasks() -> usize {
    100
}

/// Telegram bot settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub allow_from: Vec<String>,
}

/// All chat channels
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// One LLM endpoint
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

/// Known LLM endpoints, tried in order openrouter, openai, vllm
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openrouter: ProviderConfig,
    #[serde(default)]
    pub openai: ProviderConfig,
    #[serde(default)]
    pub vllm: ProviderConfig,
}

/// Brave search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            max_results: default_max_results(),
        }
    }
}

fn default_max_results() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebToolsConfig {
    #[serde(default)]
    pub search: WebSearchConfig,
}

/// Tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub web: WebToolsConfig,
    #[serde(default = "default_exec_timeout_secs")]
    pub exec_timeout_secs: u64,
    /// Upper bound for any single tool call; unset means tools bound themselves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_timeout_secs: Option<u64>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            web: WebToolsConfig::default(),
            exec_timeout_secs: default_exec_timeout_secs(),
            call_timeout_secs: None,
        }
    }
}

fn default_exec_timeout_secs() -> u64 {
    60
}

/// Root configuration document
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub subagents: SubagentSettings,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Load from the default location
    pub async fn load() -> Result<Self> {
        Self::load_from(&config_path()).await
    }

    /// Load from a specific file; a missing file yields defaults
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        debug!("Loading config from {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save to the default location
    pub async fn save(&self) -> Result<()> {
        self.save_to(&config_path()).await
    }

    /// Save to a specific file, creating parent directories
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        debug!("Writing config to {:?}", path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Resolved agent workspace
    pub fn workspace_path(&self) -> PathBuf {
        paths::expand_home(&self.agent.workspace)
    }

    /// First configured API key
    pub fn api_key(&self) -> Option<String> {
        [
            &self.providers.openrouter,
            &self.providers.openai,
            &self.providers.vllm,
        ]
        .into_iter()
        .map(|p| p.api_key.clone())
        .find(|k| !k.is_empty())
    }

    /// API base matching the provider that supplied the key
    pub fn api_base(&self) -> Option<String> {
        if !self.providers.openrouter.api_key.is_empty() {
            return self
                .providers
                .openrouter
                .api_base
                .clone()
                .or_else(|| Some("https://openrouter.ai/api/v1".to_string()));
        }
        if !self.providers.openai.api_key.is_empty() {
            return self.providers.openai.api_base.clone();
        }
        self.providers
            .vllm
            .api_base
            .clone()
            .filter(|base| !base.is_empty())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key().is_some()
    }

    pub fn default_model(&self) -> String {
        self.agent.model.clone()
    }

    /// Brave search key, if set
    pub fn brave_api_key(&self) -> Option<String> {
        let key = &self.tools.web.search.api_key;
        if key.is_empty() {
            None
        } else {
            Some(key.clone())
        }
    }

    pub fn max_agent_iterations(&self) -> u32 {
        self.agent.max_agent_iterations.max(1)
    }

    pub fn max_messages_per_session(&self) -> usize {
        self.agent.max_messages_per_session
    }
}

/// Create the config file (if missing) and the workspace directory
pub async fn init() -> Result<Config> {
    let path = config_path();

    if path.exists() {
        warn!("Config already exists at {:?}", path);
    } else {
        Config::default().save_to(&path).await?;
        info!("Created config at {:?}", path);
    }

    let config = Config::load_from(&path).await?;
    let workspace = config.workspace_path();
    tokio::fs::create_dir_all(&workspace).await?;
    info!("Workspace ready at {:?}", workspace);

    Ok(config)
}
