//! Scheduled jobs: definitions, the JSON job store and the tick loop

use thiserror::Error;

pub mod job;
pub mod scheduler;
pub mod service;

pub use job::{Job, JobState, Payload, RunStatus, Schedule};
pub use scheduler::{CronScheduler, JobRunner, RunnerError};
pub use service::{CronService, JobStore};

/// Cron errors
#[derive(Error, Debug)]
pub enum CronError {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("no job with id {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt job store: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CronError>;

/// Milliseconds since the epoch, local clock
pub fn now_ms() -> i64 {
    chrono::Local::now().timestamp_millis()
}
