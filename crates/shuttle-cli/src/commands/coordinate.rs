//! Manual coordination: `shuttle claim`, `shuttle release`, `shuttle wait`.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use tracing::info;

use shuttle_core::app::{ClaimArbiter, DependencyResolver, EventBus, WaitOutcome};
use shuttle_core::domain::TaskId;

use super::Context;

#[derive(Args)]
pub struct WaitArgs {
    /// Task ids to wait for
    #[arg(required = true)]
    pub ids: Vec<String>,

    /// Seconds between checks (default: dependencies.poll_interval_secs)
    #[arg(long)]
    pub poll_interval: Option<f64>,

    /// Give up after this many seconds (default: dependencies.max_wait_secs)
    #[arg(long)]
    pub max_wait: Option<f64>,
}

fn arbiter(ctx: &Context, role: &str) -> ClaimArbiter {
    let events = EventBus::new(ctx.stream(), ctx.agent(role));
    ClaimArbiter::new(ctx.store(), events)
}

pub async fn claim(ctx: Context, patterns: Vec<String>, reason: String) -> Result<()> {
    let arbiter = arbiter(&ctx, "cli");
    let agent = arbiter.agent().clone();

    if !arbiter.claim(&patterns, &reason).await {
        bail!("Cannot claim {patterns:?}: overlapping claims are held by other agents");
    }
    println!("Claimed {patterns:?} as {agent}");
    if ctx.config.agent_id.is_none() {
        println!("Use --agent-id {agent} to release");
    }
    Ok(())
}

pub async fn release(ctx: Context, patterns: Vec<String>) -> Result<()> {
    if ctx.config.agent_id.is_none() {
        bail!("Releasing requires the claiming agent's id; pass --agent-id or set AGENT_ID");
    }
    let arbiter = arbiter(&ctx, "cli");
    arbiter
        .release(&patterns)
        .await
        .context("Failed to release claims")?;
    println!("Released {patterns:?} for {}", arbiter.agent());
    Ok(())
}

pub async fn wait(ctx: Context, args: WaitArgs) -> Result<()> {
    let ids: BTreeSet<TaskId> = args.ids.iter().map(|id| TaskId::new(id.as_str())).collect();
    let poll = seconds(args.poll_interval, ctx.config.dependencies.poll_interval())?;
    let max_wait = seconds(args.max_wait, ctx.config.dependencies.max_wait())?;

    let resolver = DependencyResolver::new(ctx.store(), ctx.config.tasks_dir.clone());
    info!(?ids, max_wait_secs = max_wait.as_secs_f64(), "waiting for tasks");
    match resolver
        .wait_for(&ids, poll, max_wait)
        .await
        .context("Failed to check dependencies")?
    {
        WaitOutcome::Satisfied => {
            println!("All of {:?} completed", args.ids);
            Ok(())
        }
        WaitOutcome::TimedOut => bail!(
            "Timed out after {:.0}s waiting for {:?}",
            max_wait.as_secs_f64(),
            args.ids
        ),
    }
}

fn seconds(flag: Option<f64>, default: Duration) -> Result<Duration> {
    match flag {
        None => Ok(default),
        Some(secs) => Duration::try_from_secs_f64(secs)
            .with_context(|| format!("Invalid duration: {secs}")),
    }
}
