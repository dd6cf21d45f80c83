//! Shared helpers for the kestrel CLI tests
#![allow(dead_code)]

use assert_cmd::Command;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

/// Nothing listens here, so provider calls fail fast
pub const DEAD_API_BASE: &str = "http://127.0.0.1:9/v1";

pub fn kestrel() -> Command {
    Command::cargo_bin("kestrel").expect("kestrel binary")
}

/// An isolated HOME with its own ~/.kestrel
pub struct TestEnv {
    pub home: TempDir,
    pub data_dir: PathBuf,
    pub workspace_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> anyhow::Result<Self> {
        let home = tempdir()?;
        let data_dir = home.path().join(".kestrel");
        let workspace_dir = data_dir.join("workspace");
        Ok(Self {
            home,
            data_dir,
            workspace_dir,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn jobs_file(&self) -> PathBuf {
        self.data_dir.join("cron").join("jobs.json")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    /// The binary with HOME pointed at this environment
    pub fn command(&self) -> Command {
        let mut cmd = kestrel();
        cmd.env("HOME", self.home.path());
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// Config with an API key aimed at an unreachable endpoint
    pub fn create_config(&self) -> anyhow::Result<()> {
        self.write_config(serde_json::json!({
            "agent": {"model": "test/model"},
            "providers": {"openrouter": {"api_key": "test-api-key", "api_base": DEAD_API_BASE}}
        }))
    }

    pub fn write_config(&self, config: serde_json::Value) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::write(self.config_file(), serde_json::to_string_pretty(&config)?)?;
        Ok(())
    }

    pub fn read_jobs(&self) -> anyhow::Result<serde_json::Value> {
        let content = std::fs::read_to_string(self.jobs_file())?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
