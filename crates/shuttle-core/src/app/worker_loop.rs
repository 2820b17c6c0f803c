//! WorkerLoop - タスク実行ループ
//!
//! # フロー
//! 1. TaskPicker で snapshot を取り、最初の eligible なタスクを選ぶ
//! 2. TaskLifecycle::begin で claim + in_progress commit
//! 3. TaskExecutor を実行（途中経過は ProgressReporter 経由）
//! 4. 成功なら complete（成果物と completed を atomic commit → release）
//!
//! # 終了条件
//! - 連続 `max_empty_polls` 回、候補なし
//! - `max_tasks` 件完了
//! - shutdown signal（実行中なら claim を release してから抜ける）
//! - executor の fatal error（release → error event → Err）

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::app::event_bus::EventBus;
use crate::app::lifecycle::{ClaimedTask, TaskLifecycle};
use crate::app::picker::TaskPicker;
use crate::app::progress::ProgressReporter;
use crate::config::ShuttleConfig;
use crate::domain::CoordError;
use crate::ports::{Clock, TaskExecutor};

/// Loop tuning, taken from `ShuttleConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub role: String,
    pub poll_interval: Duration,
    pub max_empty_polls: u32,
    pub max_tasks: Option<u32>,
    pub claim_retry_delay: Duration,
    pub debounce_interval: Duration,
    pub debounce_chars: usize,
}

impl WorkerSettings {
    pub fn from_config(config: &ShuttleConfig) -> Self {
        Self {
            role: "worker".to_string(),
            poll_interval: config.worker.poll_interval(),
            max_empty_polls: config.worker.max_empty_polls,
            max_tasks: config.worker.max_tasks.filter(|n| *n > 0),
            claim_retry_delay: config.worker.claim_retry_delay(),
            debounce_interval: config.debounce.min_interval(),
            debounce_chars: config.debounce.min_chars,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// `max_empty_polls` consecutive polls found nothing.
    Idle,
    TaskLimit,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    pub exit: ExitReason,
}

#[derive(Default)]
struct Tally {
    completed: u32,
    failed: u32,
}

pub struct WorkerLoop {
    picker: TaskPicker,
    lifecycle: TaskLifecycle,
    events: EventBus,
    executor: Arc<dyn TaskExecutor>,
    clock: Arc<dyn Clock>,
    settings: WorkerSettings,
}

impl WorkerLoop {
    pub fn new(
        picker: TaskPicker,
        lifecycle: TaskLifecycle,
        events: EventBus,
        executor: Arc<dyn TaskExecutor>,
        clock: Arc<dyn Clock>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            picker,
            lifecycle,
            events,
            executor,
            clock,
            settings,
        }
    }

    /// Run until idle, the task limit, shutdown, or a fatal executor error.
    ///
    /// `agent_join` / `agent_leave` bracket the run on every exit path.
    pub async fn run(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<WorkerReport, CoordError> {
        let agent = self.events.agent().clone();
        info!(agent = %agent, "worker starting");
        self.events.join(&self.settings.role).await;

        let mut tally = Tally::default();
        let result = self.poll(&mut tally, &mut shutdown).await;

        self.events
            .leave(&self.settings.role, tally.completed)
            .await;
        info!(
            agent = %agent,
            completed = tally.completed,
            failed = tally.failed,
            "worker finished"
        );

        result.map(|exit| WorkerReport {
            tasks_completed: tally.completed,
            tasks_failed: tally.failed,
            exit,
        })
    }

    async fn poll(
        &self,
        tally: &mut Tally,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<ExitReason, CoordError> {
        let max_empty = self.settings.max_empty_polls.max(1);
        let mut empty_polls = 0;

        loop {
            if *shutdown.borrow() {
                return Ok(ExitReason::Shutdown);
            }
            if let Some(max) = self.settings.max_tasks
                && tally.completed >= max
            {
                info!(max, "task limit reached");
                return Ok(ExitReason::TaskLimit);
            }

            let picked = match self.picker.pick().await {
                Ok(picked) => picked,
                Err(e) => {
                    warn!(error = %e, "task scan failed");
                    None
                }
            };

            let Some(task) = picked else {
                empty_polls += 1;
                if empty_polls >= max_empty {
                    info!(empty_polls, "no tasks found, exiting");
                    return Ok(ExitReason::Idle);
                }
                info!(empty_polls, max_empty, "no eligible task, waiting");
                if pause(self.settings.poll_interval, shutdown).await {
                    return Ok(ExitReason::Shutdown);
                }
                continue;
            };
            empty_polls = 0;

            info!(task = %task.id, key = %task.key, title = %task.title, "found task");
            let claimed = match self.lifecycle.begin(&task).await {
                Ok(Some(claimed)) => claimed,
                outcome => {
                    match outcome {
                        Err(e) => warn!(task = %task.id, error = %e, "claim failed"),
                        _ => info!(task = %task.id, "claim lost to another agent"),
                    }
                    if pause(self.settings.claim_retry_delay, shutdown).await {
                        return Ok(ExitReason::Shutdown);
                    }
                    continue;
                }
            };

            if self.execute(claimed, tally, shutdown).await? {
                return Ok(ExitReason::Shutdown);
            }
        }
    }

    /// Run the executor on a claimed task. `Ok(true)` when interrupted.
    async fn execute(
        &self,
        claimed: ClaimedTask,
        tally: &mut Tally,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool, CoordError> {
        let task_id = claimed.descriptor.id.clone();
        let mut progress = ProgressReporter::new(
            self.events.clone(),
            self.clock.clone(),
            self.settings.debounce_interval,
            self.settings.debounce_chars,
        );

        let outcome = tokio::select! {
            result = self.executor.run(&claimed.descriptor, &mut progress) => Some(result),
            _ = wait_for_shutdown(shutdown) => None,
        };
        progress.flush().await;

        match outcome {
            None => {
                info!(task = %task_id, "interrupted, releasing claim");
                self.lifecycle.abandon(&claimed).await;
                Ok(true)
            }
            Some(Ok(output)) => {
                match self.lifecycle.complete(claimed, output).await {
                    Ok(_) => {
                        tally.completed += 1;
                        info!(task = %task_id, total = tally.completed, "task done");
                    }
                    Err(e) => {
                        tally.failed += 1;
                        error!(task = %task_id, error = %e, "completion failed");
                        self.events.error(Some(&task_id), &e.to_string()).await;
                    }
                }
                Ok(false)
            }
            Some(Err(e)) if e.is_fatal() => {
                error!(task = %task_id, error = %e, "fatal executor error, stopping");
                self.lifecycle.abandon(&claimed).await;
                self.events.error(Some(&task_id), e.message()).await;
                Err(CoordError::Executor(e))
            }
            Some(Err(e)) => {
                tally.failed += 1;
                warn!(task = %task_id, error = %e, "task failed");
                self.lifecycle.abandon(&claimed).await;
                Ok(false)
            }
        }
    }
}

/// Resolves once shutdown is requested. A dropped sender never resolves.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Sleep for `duration`; `true` if shutdown arrived first.
async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = wait_for_shutdown(shutdown) => true,
    }
}
