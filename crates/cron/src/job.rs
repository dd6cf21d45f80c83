//! Job definitions and schedule arithmetic

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{CronError, Result};

/// When a job fires
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Schedule {
    /// Once, at a fixed time (ms since epoch)
    At { at_ms: i64 },
    /// Repeatedly, every `every_ms` milliseconds
    Every { every_ms: i64 },
    /// Standard five-field cron expression, local time
    Cron { expr: String },
}

impl Schedule {
    pub fn at(when: DateTime<Local>) -> Self {
        Schedule::At {
            at_ms: when.timestamp_millis(),
        }
    }

    pub fn every(period: Duration) -> Result<Self> {
        let every_ms = i64::try_from(period.as_millis()).unwrap_or(i64::MAX);
        if every_ms <= 0 {
            return Err(CronError::InvalidSchedule(
                "interval must be positive".to_string(),
            ));
        }
        Ok(Schedule::Every { every_ms })
    }

    /// Validate `expr` and build a cron schedule
    pub fn cron(expr: impl Into<String>) -> Result<Self> {
        let expr = expr.into();
        cron_parser::parse(&expr, Local::now())
            .map_err(|e| CronError::InvalidSchedule(format!("'{}': {:?}", expr, e)))?;
        Ok(Schedule::Cron { expr })
    }

    /// First fire time strictly after `now_ms`, if any
    pub fn next_after(&self, now_ms: i64) -> Option<i64> {
        match self {
            Schedule::At { at_ms } => (*at_ms > now_ms).then_some(*at_ms),
            Schedule::Every { every_ms } if *every_ms > 0 => Some(now_ms + every_ms),
            Schedule::Every { .. } => None,
            Schedule::Cron { expr } => {
                let now = Local.timestamp_millis_opt(now_ms).single()?;
                cron_parser::parse(expr, now)
                    .ok()
                    .map(|next| next.timestamp_millis())
            }
        }
    }

    /// Short human form for listings
    pub fn describe(&self) -> String {
        match self {
            Schedule::At { at_ms } => match Local.timestamp_millis_opt(*at_ms).single() {
                Some(when) => format!("at {}", when.format("%Y-%m-%d %H:%M")),
                None => format!("at {}ms", at_ms),
            },
            Schedule::Every { every_ms } => {
                let secs = every_ms / 1000;
                if secs > 0 && secs % 3600 == 0 {
                    format!("every {}h", secs / 3600)
                } else if secs > 0 && secs % 60 == 0 {
                    format!("every {}m", secs / 60)
                } else {
                    format!("every {}s", secs)
                }
            }
            Schedule::Cron { expr } => format!("cron '{}'", expr),
        }
    }
}

/// What a job does when it fires
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payload {
    /// Prompt handed to the agent
    pub message: String,
    /// Deliver the agent's reply to `channel`/`to` instead of keeping it private
    #[serde(default)]
    pub deliver: bool,
    #[serde(default)]
    pub channel: Option<String>,
    /// Chat id on `channel`
    #[serde(default)]
    pub to: Option<String>,
}

impl Payload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            deliver: false,
            channel: None,
            to: None,
        }
    }

    /// Deliver replies to one chat
    pub fn deliver_to(mut self, channel: impl Into<String>, to: impl Into<String>) -> Self {
        self.deliver = true;
        self.channel = Some(channel.into());
        self.to = Some(to.into());
        self
    }

    /// Target chat, when delivery is on and fully addressed
    pub fn target(&self) -> Option<(&str, &str)> {
        if !self.deliver {
            return None;
        }
        match (self.channel.as_deref(), self.to.as_deref()) {
            (Some(channel), Some(to)) if !channel.is_empty() && !to.is_empty() => {
                Some((channel, to))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobState {
    #[serde(default)]
    pub next_run_at_ms: Option<i64>,
    #[serde(default)]
    pub last_run_at_ms: Option<i64>,
    #[serde(default)]
    pub last_status: Option<RunStatus>,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// A scheduled job as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub schedule: Schedule,
    pub payload: Payload,
    #[serde(default)]
    pub state: JobState,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    /// Drop a one-shot job after it fires instead of disabling it
    #[serde(default)]
    pub delete_after_run: bool,
}

fn default_true() -> bool {
    true
}

impl Job {
    pub fn new(name: impl Into<String>, schedule: Schedule, payload: Payload) -> Self {
        let now = crate::now_ms();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
            name: name.into(),
            enabled: true,
            schedule,
            payload,
            state: JobState::default(),
            created_at_ms: now,
            updated_at_ms: now,
            delete_after_run: false,
        }
    }

    pub fn delete_after_run(mut self, delete: bool) -> Self {
        self.delete_after_run = delete;
        self
    }

    /// Session a private run of this job uses
    pub fn session_id(&self) -> String {
        format!("cron:{}", self.id)
    }

    pub fn is_due_at(&self, now_ms: i64) -> bool {
        self.enabled && self.state.next_run_at_ms.is_some_and(|t| now_ms >= t)
    }

    /// Recompute the next fire time from `now_ms`
    pub fn schedule_next(&mut self, now_ms: i64) {
        self.state.next_run_at_ms = if self.enabled {
            self.schedule.next_after(now_ms)
        } else {
            None
        };
    }

    pub fn set_enabled(&mut self, enabled: bool, now_ms: i64) {
        self.enabled = enabled;
        self.schedule_next(now_ms);
        self.updated_at_ms = now_ms;
    }

    /// Store the outcome of a run; returns false when the job should be dropped
    pub fn record_run(&mut self, status: RunStatus, error: Option<String>, now_ms: i64) -> bool {
        self.state.last_run_at_ms = Some(now_ms);
        self.state.last_status = Some(status);
        self.state.last_error = error;
        self.updated_at_ms = now_ms;

        if matches!(self.schedule, Schedule::At { .. }) {
            if self.delete_after_run {
                return false;
            }
            self.enabled = false;
            self.state.next_run_at_ms = None;
        } else {
            self.schedule_next(now_ms);
        }
        true
    }
}
