//! TaskLifecycle - claim → commit → release の状態遷移
//!
//! ```text
//! Unclaimed --begin--> Claimed(in_progress) --complete--> Released(completed)
//!                           |
//!                           +--abandon--> Unclaimed (status は進めない)
//! ```
//!
//! # 不変条件
//! - claim を保持したまま descriptor が `pending` のまま残る状態を作らない
//!   （in_progress の commit に失敗したら release してからエラーを返す）
//! - completed の descriptor と成果物は 1 回の atomic commit で書く
//! - complete は commit の成否にかかわらず release する

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::app::claim::ClaimArbiter;
use crate::app::event_bus::EventBus;
use crate::domain::{AgentId, CoordError, TaskDescriptor, codec};
use crate::ports::{CommitId, CommitRequest, ExecutorOutput, RemoteStore};

/// A task this agent holds: committed `in_progress`, claim active.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub descriptor: TaskDescriptor,
    pub patterns: Vec<String>,
}

pub struct TaskLifecycle {
    store: Arc<dyn RemoteStore>,
    arbiter: ClaimArbiter,
    events: EventBus,
    branch: String,
}

impl TaskLifecycle {
    pub fn new(store: Arc<dyn RemoteStore>, events: EventBus, branch: impl Into<String>) -> Self {
        Self {
            arbiter: ClaimArbiter::new(store.clone(), events.clone()),
            store,
            events,
            branch: branch.into(),
        }
    }

    pub fn agent(&self) -> &AgentId {
        self.events.agent()
    }

    /// Claim `task` and mark it `in_progress`.
    ///
    /// `Ok(None)` means another agent got there first (claim rejected, or
    /// the fresh descriptor is no longer claimable).
    pub async fn begin(&self, task: &TaskDescriptor) -> Result<Option<ClaimedTask>, CoordError> {
        let patterns = task.claim_patterns();
        let reason = format!("Implementing task: {}", task.title);
        if !self.arbiter.claim(&patterns, &reason).await {
            return Ok(None);
        }

        match self.mark_in_progress(task).await {
            Ok(Some(descriptor)) => {
                info!(task = %descriptor.id, key = %descriptor.key, "task started");
                Ok(Some(ClaimedTask {
                    descriptor,
                    patterns,
                }))
            }
            Ok(None) => {
                self.release(&patterns).await;
                Ok(None)
            }
            Err(e) => {
                self.release(&patterns).await;
                Err(e)
            }
        }
    }

    async fn mark_in_progress(
        &self,
        task: &TaskDescriptor,
    ) -> Result<Option<TaskDescriptor>, CoordError> {
        // the scan is advisory; re-read under the claim
        let Some(raw) = self.store.read(&task.key).await? else {
            info!(key = %task.key, "descriptor vanished after claim");
            return Ok(None);
        };
        let fresh = codec::parse(&task.key, &raw);
        if !fresh.is_claimable() {
            info!(
                key = %task.key,
                status = %fresh.status(),
                claimed_by = fresh.claimed_by().map(AgentId::as_str),
                "descriptor changed since scan"
            );
            return Ok(None);
        }

        let started = fresh.start(self.agent())?;
        let message = format!("Claim task: {}", started.title);
        let files = BTreeMap::from([(started.key.clone(), codec::serialize(&started))]);
        self.commit(&started.key, message, files).await?;
        Ok(Some(started))
    }

    /// Commit `completed` together with the executor's files, then release.
    pub async fn complete(
        &self,
        claimed: ClaimedTask,
        output: ExecutorOutput,
    ) -> Result<CommitId, CoordError> {
        let result = self.commit_completion(&claimed, output).await;
        self.release(&claimed.patterns).await;

        let (done, commit) = result?;
        info!(task = %done.id, commit = %commit, "task completed");
        self.events.task_completed(&done, &commit).await;
        Ok(commit)
    }

    async fn commit_completion(
        &self,
        claimed: &ClaimedTask,
        output: ExecutorOutput,
    ) -> Result<(TaskDescriptor, CommitId), CoordError> {
        let done = claimed.descriptor.complete()?;
        let message = output
            .commit_message
            .unwrap_or_else(|| format!("Complete task {}: {}", done.id, done.title));

        let mut files = output.files;
        if files.contains_key(&done.key) {
            warn!(key = %done.key, "executor output overwrites the descriptor; ignoring it");
        }
        files.insert(done.key.clone(), codec::serialize(&done));

        let commit = self.commit(&done.key, message, files).await?;
        Ok((done, commit))
    }

    /// Give the task up without advancing its status.
    pub async fn abandon(&self, claimed: &ClaimedTask) {
        info!(task = %claimed.descriptor.id, "abandoning task");
        self.release(&claimed.patterns).await;
    }

    async fn commit(
        &self,
        key: &str,
        message: String,
        files: BTreeMap<String, String>,
    ) -> Result<CommitId, CoordError> {
        let request = CommitRequest {
            branch: self.branch.clone(),
            message,
            author: self.agent().clone(),
            files,
        };
        self.store
            .commit(&request)
            .await
            .map_err(|source| CoordError::CommitFailed {
                key: key.to_string(),
                source,
            })
    }

    async fn release(&self, patterns: &[String]) {
        if let Err(e) = self.arbiter.release(patterns).await {
            warn!(?patterns, error = %e, "release failed; claim may be orphaned");
        }
    }
}
