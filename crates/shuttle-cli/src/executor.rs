//! CommandExecutor - 外部プロセスでタスクを実行する TaskExecutor
//!
//! # プロトコル
//! - stdin: descriptor のテキスト（metadata + body）。書き終えたら閉じる
//! - 環境変数: `SHUTTLE_TASK_ID`, `SHUTTLE_TASK_KEY`, `SHUTTLE_TASK_TITLE`, `SHUTTLE_AGENT_ID`
//! - stdout: 1 行 1 JSON メッセージ（JSON でない行はログに流す）
//!   - `{"type":"chunk","path":...,"content":...}` 途中経過（間引かれる）
//!   - `{"type":"file","path":...,"content":...}` 完成したファイル（commit 対象、同じ path は後勝ち）
//!   - `{"type":"result","commit_message":...}`
//!   - `{"type":"error","message":...}`
//! - 終了コード: 0 は成功、`fatal_exit_code`（既定 77）はワーカー停止、それ以外はタスク失敗

use std::process::Stdio;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use shuttle_core::domain::{ExecutorError, TaskDescriptor, codec};
use shuttle_core::ports::{ExecutorOutput, ProgressSink, TaskExecutor};

/// Exit code meaning "retrying cannot help" (credits exhausted and the like).
pub const FATAL_EXIT_CODE: i32 = 77;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Message {
    Chunk {
        path: String,
        content: String,
    },
    File {
        path: String,
        content: String,
    },
    Result {
        #[serde(default)]
        commit_message: Option<String>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    fatal_exit_code: i32,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            fatal_exit_code: FATAL_EXIT_CODE,
        }
    }

    /// `[program, args...]`
    pub fn from_command_line(command: &[String]) -> Result<Self> {
        let Some((program, args)) = command.split_first() else {
            bail!("No executor command given");
        };
        Ok(Self::new(program.clone(), args.to_vec()))
    }

    pub fn with_fatal_exit_code(mut self, code: i32) -> Self {
        self.fatal_exit_code = code;
        self
    }
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn run(
        &self,
        task: &TaskDescriptor,
        progress: &mut dyn ProgressSink,
    ) -> Result<ExecutorOutput, ExecutorError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("SHUTTLE_TASK_ID", task.id.as_str())
            .env("SHUTTLE_TASK_KEY", &task.key)
            .env("SHUTTLE_TASK_TITLE", &task.title)
            .env(
                "SHUTTLE_AGENT_ID",
                task.claimed_by().map(|a| a.as_str()).unwrap_or_default(),
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            // 中断時（future が drop されたとき）に子プロセスも止める
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            ExecutorError::failed(format!("failed to spawn {}: {e}", self.program))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let input = codec::serialize(task);
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!(error = %e, "executor closed stdin early");
                }
                // Drop stdin to signal EOF
            });
        }

        let Some(stdout) = child.stdout.take() else {
            return Err(ExecutorError::failed("executor stdout unavailable"));
        };
        let mut lines = BufReader::new(stdout).lines();
        let mut output = ExecutorOutput::default();
        let mut last_error = None;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| ExecutorError::failed(format!("failed to read executor output: {e}")))?
        {
            match serde_json::from_str::<Message>(&line) {
                Ok(Message::Chunk { path, content }) => progress.chunk(&path, &content).await,
                Ok(Message::File { path, content }) => {
                    progress.file_written(&path, &content).await;
                    output.files.insert(path, content);
                }
                Ok(Message::Result { commit_message }) => output.commit_message = commit_message,
                Ok(Message::Error { message }) => {
                    warn!(task = %task.id, message, "executor reported an error");
                    last_error = Some(message);
                }
                Err(_) => info!(task = %task.id, "{line}"),
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ExecutorError::failed(format!("failed to wait for executor: {e}")))?;

        match status.code() {
            Some(0) => Ok(output),
            Some(code) => {
                let message =
                    last_error.unwrap_or_else(|| format!("executor exited with code {code}"));
                if code == self.fatal_exit_code {
                    Err(ExecutorError::fatal(message))
                } else {
                    Err(ExecutorError::failed(message))
                }
            }
            None => Err(ExecutorError::failed(
                last_error.unwrap_or_else(|| "executor killed by signal".to_string()),
            )),
        }
    }
}
