//! `shuttle work` - the worker loop with a subprocess executor.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Args;
use tokio::sync::watch;
use tracing::{info, warn};

use shuttle_core::app::{ExitReason, WorkerBuilder};

use super::Context;
use crate::executor::CommandExecutor;

#[derive(Args)]
pub struct WorkArgs {
    /// Stop after this many completed tasks
    #[arg(long, env = "MAX_TASKS")]
    pub max_tasks: Option<u32>,

    /// Consecutive empty polls before exiting
    #[arg(long)]
    pub max_empty_polls: Option<u32>,

    /// Exit code of the executor that means "stop the worker"
    #[arg(long, default_value_t = crate::executor::FATAL_EXIT_CODE)]
    pub fatal_exit_code: i32,

    /// Executor program and its arguments
    #[arg(required = true, last = true, value_name = "PROGRAM")]
    pub command: Vec<String>,
}

pub async fn run(ctx: Context, args: WorkArgs) -> Result<()> {
    let mut config = ctx.config.clone();
    if args.max_tasks.is_some() {
        config.worker.max_tasks = args.max_tasks;
    }
    if let Some(max_empty_polls) = args.max_empty_polls {
        config.worker.max_empty_polls = max_empty_polls;
    }

    let executor = CommandExecutor::from_command_line(&args.command)?
        .with_fatal_exit_code(args.fatal_exit_code);
    let agent = ctx.agent("worker");
    let store = ctx.raw_store();

    let worker = WorkerBuilder::new(config)
        .store(store.clone())
        .events(store)
        .executor(Arc::new(executor))
        .agent(agent.clone())
        .build()
        .context("Failed to build worker")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => warn!(error = %e, "cannot listen for interrupts"),
        }
    });

    info!(agent = %agent, "starting worker");
    let report = worker.run(shutdown_rx).await.context("Worker stopped")?;

    let reason = match report.exit {
        ExitReason::Idle => "no more eligible tasks",
        ExitReason::TaskLimit => "task limit reached",
        ExitReason::Shutdown => "interrupted",
    };
    println!(
        "{agent}: {} completed, {} failed ({reason})",
        report.tasks_completed, report.tasks_failed
    );
    Ok(())
}
