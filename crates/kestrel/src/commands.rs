//! kestrel command implementations

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use clap::{ArgGroup, Args};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use kestrel_agent::AgentRuntime;
use kestrel_bus::{MessageBus, OutboundDispatcher};
use kestrel_channels::{Channel, TelegramChannel};
use kestrel_config::{self, Config};
use kestrel_cron::{CronScheduler, CronService, Job, Payload, Schedule};
use kestrel_provider::OpenRouterProvider;
use kestrel_session::{JsonFilePersistence, SessionStore};

use crate::runner::AgentJobRunner;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Options of `kestrel cron add`
#[derive(Args, Debug)]
#[command(group(ArgGroup::new("when").required(true).args(["every", "cron", "at"])))]
pub struct CronAddArgs {
    /// Job name
    #[arg(short, long)]
    pub name: String,
    /// Prompt sent to the agent when the job fires
    #[arg(short, long)]
    pub message: String,
    /// Run every N seconds
    #[arg(short, long)]
    pub every: Option<u64>,
    /// Cron expression, e.g. "0 9 * * *"
    #[arg(short, long)]
    pub cron: Option<String>,
    /// Run once at this time (RFC 3339 or "YYYY-MM-DD HH:MM")
    #[arg(long)]
    pub at: Option<String>,
    /// Channel to deliver the reply to
    #[arg(long, requires = "to")]
    pub channel: Option<String>,
    /// Chat id on the delivery channel
    #[arg(long, requires = "channel")]
    pub to: Option<String>,
    /// Delete a one-shot job after it runs instead of disabling it
    #[arg(long)]
    pub delete_after_run: bool,
}

fn parse_at(value: &str) -> Result<DateTime<Local>> {
    if let Ok(when) = DateTime::parse_from_rfc3339(value) {
        return Ok(when.with_timezone(&Local));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M")
        .with_context(|| format!("cannot parse time '{}'", value))?;
    Local
        .from_local_datetime(&naive)
        .single()
        .with_context(|| format!("'{}' is ambiguous in the local timezone", value))
}

fn format_ms(ms: Option<i64>) -> String {
    ms.and_then(|ms| Local.timestamp_millis_opt(ms).single())
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

async fn open_cron() -> Result<CronService> {
    let path = kestrel_config::cron_store_path();
    CronService::open(&path)
        .await
        .with_context(|| format!("failed to open job store {}", path.display()))
}

/// List scheduled jobs
pub async fn cron_list_command(all: bool) -> Result<()> {
    let service = open_cron().await?;
    let jobs = service.list_jobs(all);

    if jobs.is_empty() {
        println!("No scheduled jobs");
        return Ok(());
    }

    println!("Scheduled jobs:");
    for job in jobs {
        let status = if job.enabled { "enabled" } else { "disabled" };
        let delivery = match job.payload.target() {
            Some((channel, to)) => format!(" -> {}:{}", channel, to),
            None => String::new(),
        };
        println!(
            "  {}  {}  {} ({}), next {}{}",
            job.id,
            job.name,
            job.schedule.describe(),
            status,
            format_ms(job.state.next_run_at_ms),
            delivery
        );
    }
    Ok(())
}

/// Add a scheduled job
pub async fn cron_add_command(args: CronAddArgs) -> Result<()> {
    let schedule = if let Some(seconds) = args.every {
        Schedule::every(Duration::from_secs(seconds))?
    } else if let Some(expr) = args.cron {
        Schedule::cron(expr)?
    } else if let Some(at) = args.at {
        Schedule::at(parse_at(&at)?)
    } else {
        bail!("one of --every, --cron or --at is required");
    };

    let mut payload = Payload::new(args.message);
    if let (Some(channel), Some(to)) = (args.channel, args.to) {
        payload = payload.deliver_to(channel, to);
    }

    let job = Job::new(args.name, schedule, payload).delete_after_run(args.delete_after_run);
    let mut service = open_cron().await?;
    let job = service.add_job(job).await.context("failed to add job")?;

    println!(
        "Job added: {} ({}), next run {}",
        job.id,
        job.schedule.describe(),
        format_ms(job.state.next_run_at_ms)
    );
    Ok(())
}

/// Remove a scheduled job
pub async fn cron_remove_command(id: String) -> Result<()> {
    let mut service = open_cron().await?;
    if !service.remove_job(&id).await? {
        bail!("no job with id {}", id);
    }
    println!("Job {} removed", id);
    Ok(())
}

fn session_store(config: &Config) -> Arc<SessionStore> {
    let persistence = Arc::new(JsonFilePersistence::new(kestrel_config::sessions_dir()));
    Arc::new(SessionStore::with_persistence(
        config.max_messages_per_session(),
        persistence,
    ))
}

/// List stored conversations
pub async fn sessions_list_command() -> Result<()> {
    let config = Config::load().await.context("failed to load config")?;
    let sessions = session_store(&config).list().await?;

    if sessions.is_empty() {
        println!("No stored sessions");
        return Ok(());
    }

    println!("Sessions:");
    for session in sessions {
        println!(
            "  {}  {} messages, last active {}",
            session.id,
            session.message_count,
            session.last_active.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

/// Delete one stored conversation
pub async fn sessions_clear_command(id: String) -> Result<()> {
    let config = Config::load().await.context("failed to load config")?;
    if !session_store(&config).remove(&id).await? {
        bail!("no session {}", id);
    }
    println!("Session {} cleared", id);
    Ok(())
}

/// Initialize config and workspace
pub async fn init_command() -> Result<()> {
    println!("Initializing kestrel...");

    let config = kestrel_config::init()
        .await
        .context("failed to write config")?;

    let workspace = config.workspace_path();
    tokio::fs::create_dir_all(workspace.join("memory")).await?;

    create_template(&workspace, "AGENTS.md", AGENTS_MD).await?;
    create_template(&workspace, "SOUL.md", SOUL_MD).await?;
    create_template(&workspace, "USER.md", USER_MD).await?;
    create_template(&workspace.join("memory"), "MEMORY.md", MEMORY_MD).await?;

    println!("Config:    {}", kestrel_config::config_path().display());
    println!("Workspace: {}", workspace.display());
    println!("\nNext steps:");
    println!("  1. Add an API key to {}", kestrel_config::config_path().display());
    println!("  2. Start chatting: kestrel chat -m \"Hello!\"");
    Ok(())
}

async fn create_template(dir: &Path, filename: &str, content: &str) -> Result<()> {
    let path = dir.join(filename);
    if !path.exists() {
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("created {}", path.display());
    }
    Ok(())
}

fn build_runtime(config: &Config, bus: MessageBus) -> Result<AgentRuntime> {
    let api_key = config.api_key().with_context(|| {
        format!(
            "No API key configured. Set one in {}",
            kestrel_config::config_path().display()
        )
    })?;
    let provider = OpenRouterProvider::new(api_key, config.api_base(), Some(config.default_model()));

    AgentRuntime::builder()
        .config(config.clone())
        .provider(Arc::new(provider))
        .bus(bus)
        .sessions(session_store(config))
        .build()
        .context("failed to build agent runtime")
}

/// Chat with the agent, one message or interactively
///
/// Subagent reports that arrive while the chat is open are handled by the
/// same runtime loop and printed like any other reply.
pub async fn chat_command(message: Option<String>, session: String) -> Result<()> {
    let config = Config::load().await.context("failed to load config")?;
    let (bus, in_rx, mut out_rx) = MessageBus::channels();
    let runtime = Arc::new(build_runtime(&config, bus)?);
    let session_id = format!("cli:{}", session);

    let shutdown = CancellationToken::new();
    let agent_loop = tokio::spawn(Arc::clone(&runtime).run(in_rx, shutdown.clone()));
    let printer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            println!("\n{}\n", msg.content);
        }
    });

    if let Some(message) = message {
        let reply = runtime.process_direct(&message, &session_id).await;
        println!("{}", reply);
    } else {
        println!("Interactive mode (type 'exit' to quit, /new for a fresh conversation)");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            std::io::stdout().flush()?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let input = line.trim();
            if input.is_empty() {
                continue;
            }
            if input == "exit" || input == "quit" {
                break;
            }

            let reply = runtime.process_direct(input, &session_id).await;
            println!("\n{}\n", reply);
        }
    }

    shutdown.cancel();
    let _ = agent_loop.await;
    printer.abort();
    Ok(())
}

/// Run the agent loop with channels, cron and session sweeping until ctrl-c
pub async fn gateway_command() -> Result<()> {
    let start_time = std::time::Instant::now();
    let config = Config::load().await.context("failed to load config")?;
    info!(
        "channels enabled: telegram={}",
        config.channels.telegram.enabled
    );

    let (bus, in_rx, out_rx) = MessageBus::channels();
    let runtime = Arc::new(build_runtime(&config, bus.clone())?);
    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    tasks.push((
        "agent loop",
        tokio::spawn(Arc::clone(&runtime).run(in_rx, shutdown.clone())),
    ));
    tasks.push((
        "session sweeper",
        runtime.spawn_session_sweeper(shutdown.clone()),
    ));

    let mut dispatcher = OutboundDispatcher::new(out_rx);
    // Private cron runs speak on the cli channel; nobody is listening there
    dispatcher.on_channel("cli", |msg| async move {
        info!("[cli:{}] {}", msg.chat_id, msg.content);
    });

    let telegram = &config.channels.telegram;
    if telegram.enabled && !telegram.token.is_empty() {
        let mut channel = TelegramChannel::new(telegram.clone(), bus.clone())
            .with_media_dir(kestrel_config::media_dir());
        let sender = channel.clone();
        dispatcher.on_channel("telegram", move |msg| {
            let sender = sender.clone();
            async move {
                if let Err(e) = sender.send(&msg).await {
                    error!("failed to send telegram message to {}: {}", msg.chat_id, e);
                }
            }
        });

        let stop = shutdown.clone();
        tasks.push((
            "telegram",
            tokio::spawn(async move {
                tokio::select! {
                    result = channel.start() => {
                        if let Err(e) = result {
                            error!("telegram channel error: {}", e);
                        }
                    }
                    _ = stop.cancelled() => {}
                }
            }),
        ));
    } else if telegram.enabled {
        warn!("telegram is enabled but has no token; skipping");
    }

    let stop = shutdown.clone();
    tasks.push((
        "outbound dispatcher",
        tokio::spawn(async move {
            tokio::select! {
                _ = dispatcher.run() => {}
                _ = stop.cancelled() => {}
            }
        }),
    ));

    let jobs = CronService::open(kestrel_config::cron_store_path())
        .await
        .context("failed to open job store")?;
    let scheduler = CronScheduler::new(
        jobs,
        Arc::new(AgentJobRunner::new(Arc::clone(&runtime), bus.clone())),
    );
    tasks.push(("cron scheduler", tokio::spawn(scheduler.run(shutdown.clone()))));

    println!("kestrel gateway running");
    println!("Channels: telegram={}", telegram.enabled);
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    println!("\nShutting down...");
    shutdown.cancel();
    drop(bus);

    for (name, handle) in tasks {
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(())) => info!("{} stopped", name),
            Ok(Err(e)) => warn!("{} panicked: {}", name, e),
            Err(_) => warn!("{} did not stop in time", name),
        }
    }

    println!("Gateway ran for {:?}", start_time.elapsed());
    Ok(())
}

fn presence(path: &Path) -> &'static str {
    if path.exists() {
        "[OK]"
    } else {
        "[Missing]"
    }
}

/// Show configuration and runtime status
pub async fn status_command() -> Result<()> {
    let config_path = kestrel_config::config_path();

    println!("kestrel status");
    println!("Config:    {} {}", config_path.display(), presence(&config_path));

    let config = Config::load()
        .await
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let workspace = config.workspace_path();
    println!("Workspace: {} {}", workspace.display(), presence(&workspace));
    println!("Model:     {}", config.default_model());
    println!(
        "API Key:   {}",
        if config.has_api_key() { "[Set]" } else { "[Missing]" }
    );
    println!(
        "Telegram:  {}",
        if config.channels.telegram.enabled {
            "[Enabled]"
        } else {
            "[Disabled]"
        }
    );
    println!(
        "Limits:    {} iterations, {} messages per session",
        config.max_agent_iterations(),
        config.max_messages_per_session()
    );

    match CronService::open(kestrel_config::cron_store_path()).await {
        Ok(jobs) => println!(
            "Cron:      {} jobs ({} enabled)",
            jobs.store().jobs.len(),
            jobs.list_jobs(false).len()
        ),
        Err(e) => println!("Cron:      [Unreadable] {}", e),
    }
    Ok(())
}

const AGENTS_MD: &str = r#"# Agent Instructions

You are a helpful personal assistant. Be concise and practical.

## Guidelines

- Say what you are about to do before using tools
- Ask when a request is ambiguous
- Hand long research or coding tasks to a subagent
- Keep important facts in memory/MEMORY.md
"#;

const SOUL_MD: &str = r#"# Soul

Name: kestrel

## Traits

- Direct, no filler
- Technically careful
- Friendly, with the occasional dry remark
"#;

const USER_MD: &str = r#"# User

Information about the user.

## Preferences

- Style: [concise/detailed]
- Timezone: [timezone]
- Language: [language]
"#;

const MEMORY_MD: &str = r#"# Long-term Memory

Facts worth keeping across conversations.

## Facts

## Preferences

## Notes
"#;
