//! Errors - エラー型と分類
//!
//! Remote calls and executors classify their failures with a typed kind so
//! that callers dispatch on the kind instead of sniffing message text.

use std::fmt;

use thiserror::Error;

use super::ids::TaskId;
use super::status::TaskStatus;

/// StoreErrorKind は remote store 呼び出しの失敗分類
///
/// # 分類
/// - RateLimited: overload signal, the only kind RetryPolicy retries
/// - NotFound / Conflict / Unauthorized: logical errors from the store
/// - Rejected: the store answered but refused the request (e.g. commit error body)
/// - Transport: network or decode failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    RateLimited,
    NotFound,
    Conflict,
    Unauthorized,
    Rejected,
    Transport,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoreErrorKind::RateLimited => "rate_limited",
            StoreErrorKind::NotFound => "not_found",
            StoreErrorKind::Conflict => "conflict",
            StoreErrorKind::Unauthorized => "unauthorized",
            StoreErrorKind::Rejected => "rejected",
            StoreErrorKind::Transport => "transport",
        };
        f.write_str(s)
    }
}

/// Error returned by every `RemoteStore` / `EventStream` call.
#[derive(Debug, Clone, Error)]
#[error("store error ({kind}): {message}")]
pub struct StoreError {
    kind: StoreErrorKind,
    message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::RateLimited, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Transport, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Rejected, message)
    }

    pub fn kind(&self) -> StoreErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind == StoreErrorKind::RateLimited
    }
}

/// ExecutorErrorKind distinguishes "this task failed" from "this worker must stop".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorErrorKind {
    /// The task could not be finished; the worker moves on.
    Failed,
    /// Upstream quota/credit exhaustion and similar; retrying cannot help.
    Fatal,
}

#[derive(Debug, Clone, Error)]
#[error("executor {kind:?}: {message}")]
pub struct ExecutorError {
    kind: ExecutorErrorKind,
    message: String,
}

impl ExecutorError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: ExecutorErrorKind::Failed,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: ExecutorErrorKind::Fatal,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ExecutorErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == ExecutorErrorKind::Fatal
    }
}

/// Illegal status move on a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task {task}: illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub task: TaskId,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Umbrella error for coordination operations.
#[derive(Debug, Error)]
pub enum CoordError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("commit failed for {key}: {source}")]
    CommitFailed {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}
