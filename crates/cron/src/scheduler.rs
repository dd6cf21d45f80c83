//! Tick loop that fires due jobs

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::job::{Job, RunStatus};
use crate::now_ms;
use crate::service::CronService;

pub type RunnerError = Box<dyn std::error::Error + Send + Sync>;

/// Executes a fired job
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &Job) -> Result<(), RunnerError>;
}

pub struct CronScheduler {
    service: Arc<Mutex<CronService>>,
    runner: Arc<dyn JobRunner>,
    period: Duration,
}

impl CronScheduler {
    pub fn new(service: CronService, runner: Arc<dyn JobRunner>) -> Self {
        Self {
            service: Arc::new(Mutex::new(service)),
            runner,
            period: Duration::from_secs(1),
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn service(&self) -> &Arc<Mutex<CronService>> {
        &self.service
    }

    /// Fire every job due at `now_ms`; returns how many ran
    ///
    /// The store is reloaded first so jobs added from the CLI are picked up.
    /// Jobs run one after another, without holding the store lock.
    pub async fn tick(&self, now_ms: i64) -> usize {
        let due = {
            let mut service = self.service.lock().await;
            if let Err(e) = service.load().await {
                warn!("keeping in-memory cron jobs, reload failed: {}", e);
            }
            service.due_jobs(now_ms)
        };

        for job in &due {
            info!("running cron job {} ({})", job.id, job.name);
            let (status, err) = match self.runner.run(job).await {
                Ok(()) => (RunStatus::Ok, None),
                Err(e) => {
                    error!("cron job {} failed: {}", job.id, e);
                    (RunStatus::Error, Some(e.to_string()))
                }
            };
            let mut service = self.service.lock().await;
            if let Err(e) = service.record_run(&job.id, status, err, now_ms).await {
                warn!("could not record run of cron job {}: {}", job.id, e);
            }
        }
        due.len()
    }

    /// Tick until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        info!("cron scheduler started");
        let mut ticker = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("cron scheduler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick(now_ms()).await;
                }
            }
        }
    }
}
