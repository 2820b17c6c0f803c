//! # shuttle
//!
//! Worker and operator CLI for swarm task coordination.
//!
//! ## Commands
//!
//! - `shuttle work -- <program> [args...]` - run the worker loop with a subprocess executor
//! - `shuttle tasks` - status report over the task directory
//! - `shuttle claim|release <patterns...>` - manual claim management
//! - `shuttle events [--offset X] [--follow]` - tail the event stream
//! - `shuttle wait <ids...>` - block until the given tasks are completed

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod commands;
mod executor;

use commands::{EventsArgs, TasksArgs, WaitArgs, WorkArgs};

/// Swarm task coordination over a shared remote store
#[derive(Parser)]
#[command(name = "shuttle")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true, env = "SHUTTLE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Store API base URL
    #[arg(long, global = true, env = "SCRAPS_BASE_URL")]
    base_url: Option<String>,

    /// Store API key
    #[arg(long, global = true, env = "SCRAPS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Store (owner) name
    #[arg(long, global = true, env = "SHUTTLE_STORE")]
    store: Option<String>,

    /// Repository name
    #[arg(long, global = true, env = "SHUTTLE_REPO")]
    repo: Option<String>,

    /// Branch holding the task directory
    #[arg(long, global = true, env = "BRANCH")]
    branch: Option<String>,

    /// Agent id (default: generated `<role>-<ulid>`)
    #[arg(long, global = true, env = "AGENT_ID")]
    agent_id: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "SHUTTLE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker loop
    Work(WorkArgs),

    /// Show task counts, eligible tasks and why the rest are blocked
    Tasks(TasksArgs),

    /// Claim file patterns for this agent
    Claim {
        /// Patterns to claim
        #[arg(required = true)]
        patterns: Vec<String>,

        /// Reason recorded with the claim
        #[arg(short, long, default_value = "CLI claim")]
        reason: String,
    },

    /// Release file patterns held by this agent
    Release {
        /// Patterns to release
        #[arg(required = true)]
        patterns: Vec<String>,
    },

    /// Read the event stream
    Events(EventsArgs),

    /// Wait until tasks are completed
    Wait(WaitArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let overrides = commands::Overrides {
        base_url: cli.base_url,
        api_key: cli.api_key,
        store: cli.store,
        repo: cli.repo,
        branch: cli.branch,
        agent_id: cli.agent_id,
    };
    let ctx = commands::Context::load(cli.config, overrides)?;

    match cli.command {
        Commands::Work(args) => commands::work::run(ctx, args).await,
        Commands::Tasks(args) => commands::inspect::tasks(ctx, args).await,
        Commands::Claim { patterns, reason } => {
            commands::coordinate::claim(ctx, patterns, reason).await
        }
        Commands::Release { patterns } => commands::coordinate::release(ctx, patterns).await,
        Commands::Events(args) => commands::inspect::events(ctx, args).await,
        Commands::Wait(args) => commands::coordinate::wait(ctx, args).await,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    Ok(())
}
