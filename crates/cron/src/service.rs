//! JSON-backed job store

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::job::{Job, RunStatus};
use crate::{now_ms, CronError, Result};

/// On-disk layout of the job file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStore {
    pub version: u32,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

impl Default for JobStore {
    fn default() -> Self {
        Self {
            version: 1,
            jobs: Vec::new(),
        }
    }
}

/// Owns the job list and keeps it in sync with its file
pub struct CronService {
    path: PathBuf,
    store: JobStore,
}

impl CronService {
    /// Open the store at `path`; a missing file means no jobs yet
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let mut service = Self {
            path: path.into(),
            store: JobStore::default(),
        };
        service.load().await?;
        Ok(service)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Re-read the file, picking up edits made by other processes
    pub async fn load(&mut self) -> Result<()> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                self.store = serde_json::from_str(&content)?;
                debug!("loaded {} cron jobs from {:?}", self.store.jobs.len(), self.path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.store = JobStore::default();
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write through a temp file so readers never see a partial store
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&self.store)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Schedule and persist a new job
    pub async fn add_job(&mut self, mut job: Job) -> Result<Job> {
        let now = now_ms();
        job.schedule_next(now);
        if job.enabled && job.state.next_run_at_ms.is_none() {
            return Err(CronError::InvalidSchedule(format!(
                "{} never fires after now",
                job.schedule.describe()
            )));
        }
        info!("added cron job {} ({})", job.id, job.name);
        self.store.jobs.push(job.clone());
        self.save().await?;
        Ok(job)
    }

    /// Returns whether a job was removed
    pub async fn remove_job(&mut self, id: &str) -> Result<bool> {
        let before = self.store.jobs.len();
        self.store.jobs.retain(|j| j.id != id);
        let removed = self.store.jobs.len() < before;
        if removed {
            info!("removed cron job {}", id);
            self.save().await?;
        }
        Ok(removed)
    }

    pub async fn enable_job(&mut self, id: &str, enabled: bool) -> Result<Job> {
        let job = self
            .store
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| CronError::NotFound(id.to_string()))?;
        job.set_enabled(enabled, now_ms());
        let job = job.clone();
        self.save().await?;
        Ok(job)
    }

    pub fn get(&self, id: &str) -> Option<&Job> {
        self.store.jobs.iter().find(|j| j.id == id)
    }

    /// Jobs ordered by next fire time; unscheduled ones last
    pub fn list_jobs(&self, include_disabled: bool) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self
            .store
            .jobs
            .iter()
            .filter(|j| include_disabled || j.enabled)
            .collect();
        jobs.sort_by_key(|j| j.state.next_run_at_ms.unwrap_or(i64::MAX));
        jobs
    }

    pub fn due_jobs(&self, now_ms: i64) -> Vec<Job> {
        self.store
            .jobs
            .iter()
            .filter(|j| j.is_due_at(now_ms))
            .cloned()
            .collect()
    }

    /// Store a run outcome and reschedule (or drop) the job
    pub async fn record_run(
        &mut self,
        id: &str,
        status: RunStatus,
        error: Option<String>,
        now_ms: i64,
    ) -> Result<()> {
        let Some(index) = self.store.jobs.iter().position(|j| j.id == id) else {
            return Err(CronError::NotFound(id.to_string()));
        };
        if !self.store.jobs[index].record_run(status, error, now_ms) {
            let job = self.store.jobs.remove(index);
            debug!("dropped one-shot job {} after run", job.id);
        }
        self.save().await
    }
}
