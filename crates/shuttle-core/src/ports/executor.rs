//! TaskExecutor port - タスク本体を実行する外部能力
//!
//! core は executor の中身を知りません。受け取るのは成果物（path -> content）
//! と commit message だけで、途中経過は ProgressSink に流してもらいます。

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::domain::{ExecutorError, TaskDescriptor};

/// Artifacts of one successful run, committed atomically with the descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorOutput {
    pub files: BTreeMap<String, String>,
    /// Defaults to `Complete task <id>: <title>` when absent.
    pub commit_message: Option<String>,
}

impl ExecutorOutput {
    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }
}

/// Receiver of partial progress while a task runs.
#[async_trait]
pub trait ProgressSink: Send {
    /// `content` is everything written to `path` so far. May be dropped.
    async fn chunk(&mut self, path: &str, content: &str);

    /// `path` is finished with `content`. Always delivered.
    async fn file_written(&mut self, path: &str, content: &str);
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn run(
        &self,
        task: &TaskDescriptor,
        progress: &mut dyn ProgressSink,
    ) -> Result<ExecutorOutput, ExecutorError>;
}
