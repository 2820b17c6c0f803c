//! Read-only commands: `shuttle tasks`, `shuttle events`.

use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Args;

use shuttle_core::app::{EventCursor, StatusReport, TaskPicker};
use shuttle_core::domain::{StreamEvent, StreamOffset, TaskId};

use super::Context;

#[derive(Args)]
pub struct TasksArgs {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct EventsArgs {
    /// Resume after this offset (default: start of the stream)
    #[arg(long)]
    pub offset: Option<String>,

    /// Keep waiting for new events
    #[arg(short, long)]
    pub follow: bool,

    /// Page size
    #[arg(long, default_value_t = 100)]
    pub limit: usize,

    /// Long-poll wait per request in follow mode, in seconds
    #[arg(long, default_value_t = 30)]
    pub wait_secs: u64,
}

pub async fn tasks(ctx: Context, args: TasksArgs) -> Result<()> {
    let picker = TaskPicker::new(ctx.store(), ctx.config.tasks_dir.clone());
    let snapshot = picker.snapshot().await.context("Failed to scan tasks")?;
    let report = StatusReport::from_snapshot(&snapshot);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    print!("{}", render(&report));
    Ok(())
}

fn render(report: &StatusReport) -> String {
    let mut out = String::new();
    let counts = &report.counts;
    out.push_str(&format!(
        "{} tasks: {} pending, {} in progress, {} completed\n",
        counts.total(),
        counts.pending,
        counts.in_progress,
        counts.completed
    ));

    if !report.eligible.is_empty() {
        out.push_str("\nEligible:\n");
        for key in &report.eligible {
            out.push_str(&format!("  {key}\n"));
        }
    }
    if !report.in_progress.is_empty() {
        out.push_str("\nIn progress:\n");
        for task in &report.in_progress {
            let owner = task.claimed_by.as_ref().map_or("?", |a| a.as_str());
            out.push_str(&format!("  {} ({owner})\n", task.key));
        }
    }
    if !report.orphaned.is_empty() {
        out.push_str("\nOrphaned (pending but claimed):\n");
        for task in &report.orphaned {
            let owner = task.claimed_by.as_ref().map_or("?", |a| a.as_str());
            out.push_str(&format!("  {} ({owner})\n", task.key));
        }
    }
    if !report.blocked.is_empty() {
        out.push_str("\nBlocked:\n");
        for task in &report.blocked {
            let mut reasons = Vec::new();
            if !task.waiting_on.is_empty() {
                reasons.push(format!("waiting on {}", join(&task.waiting_on)));
            }
            if !task.unknown.is_empty() {
                reasons.push(format!("unknown {}", join(&task.unknown)));
            }
            if task.on_cycle {
                reasons.push("dependency cycle".to_string());
            }
            out.push_str(&format!("  {}: {}\n", task.key, reasons.join("; ")));
        }
    }
    for cycle in &report.cycles {
        let path: Vec<&str> = cycle.iter().map(TaskId::as_str).collect();
        out.push_str(&format!("\nCycle: {}\n", path.join(" -> ")));
    }
    out
}

fn join(ids: &[TaskId]) -> String {
    ids.iter().map(TaskId::as_str).collect::<Vec<_>>().join(", ")
}

pub async fn events(ctx: Context, args: EventsArgs) -> Result<()> {
    let offset = args.offset.map(StreamOffset::new);
    let mut cursor = EventCursor::new(ctx.stream(), offset).with_limit(args.limit);
    let wait = Duration::from_secs(args.wait_secs);

    loop {
        let skipped_before = cursor.skipped();
        let page = if args.follow {
            tokio::select! {
                page = cursor.follow(wait) => page,
                _ = tokio::signal::ctrl_c() => break,
            }
        } else {
            cursor.next_page().await
        }
        .context("Failed to read events")?;

        // 読めないイベントだけのページでも offset は進むので続ける
        if page.is_empty() && cursor.skipped() == skipped_before && !args.follow {
            break;
        }
        for event in &page {
            println!("{}", line(event)?);
        }
    }

    if cursor.skipped() > 0 {
        eprintln!("skipped {} undecodable events", cursor.skipped());
    }
    if let Some(offset) = cursor.offset() {
        eprintln!("next offset: {offset}");
    }
    Ok(())
}

fn line(event: &StreamEvent) -> Result<String> {
    serde_json::to_string(event).context("Failed to encode event")
}
