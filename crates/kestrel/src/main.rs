//! kestrel - a personal AI agent

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;
mod runner;

use commands::{
    chat_command, cron_add_command, cron_list_command, cron_remove_command, gateway_command,
    init_command, sessions_clear_command, sessions_list_command, status_command, CronAddArgs,
};

/// kestrel - AI agent for your terminal and chats
#[derive(Parser)]
#[command(name = "kestrel")]
#[command(about = "A personal AI agent with subagents, chat channels and scheduled jobs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config and workspace
    Init,
    /// Chat with the agent
    Chat {
        /// Send one message and exit
        #[arg(short, long)]
        message: Option<String>,
        /// Session to continue
        #[arg(short, long, default_value = "default")]
        session: String,
    },
    /// Run the agent with chat channels and scheduled jobs
    Gateway {
        /// Debug logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Show configuration and runtime status
    Status,
    /// Manage scheduled jobs
    Cron {
        #[command(subcommand)]
        command: CronCommands,
    },
    /// Manage stored conversations
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

#[derive(Subcommand)]
enum CronCommands {
    /// List scheduled jobs
    List {
        /// Include disabled jobs
        #[arg(short, long)]
        all: bool,
    },
    /// Add a scheduled job
    Add(CronAddArgs),
    /// Remove a job by id
    Remove { id: String },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// List stored sessions
    List,
    /// Delete a session's history
    Clear { id: String },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(matches!(cli.command, Commands::Gateway { verbose: true }));

    let result = match cli.command {
        Commands::Init => init_command().await,
        Commands::Chat { message, session } => chat_command(message, session).await,
        Commands::Gateway { .. } => gateway_command().await,
        Commands::Status => status_command().await,
        Commands::Cron { command } => match command {
            CronCommands::List { all } => cron_list_command(all).await,
            CronCommands::Add(args) => cron_add_command(args).await,
            CronCommands::Remove { id } => cron_remove_command(id).await,
        },
        Commands::Sessions { command } => match command {
            SessionCommands::List => sessions_list_command().await,
            SessionCommands::Clear { id } => sessions_clear_command(id).await,
        },
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
