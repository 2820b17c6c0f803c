//! RemoteStore port - 共有ストア（files, atomic commit, claim/release）
//!
//! # 設計原則
//! - commit はリクエスト単位で atomic（全ファイル反映 or 何も反映しない）
//! - claim はパターン集合に対して all-or-nothing。重なる claim は拒否される
//! - release は冪等。保持していないパターンの release も成功扱い
//! - 単一リクエストを超える linearizability は仮定しない

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use crate::domain::{AgentId, StoreError};

/// Kind of a directory listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Blob,
    Tree,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// File name relative to the listed directory.
    pub name: String,
    pub kind: EntryKind,
}

impl TreeEntry {
    pub fn blob(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Blob,
        }
    }

    pub fn tree(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Tree,
        }
    }
}

/// One atomic multi-file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    pub branch: String,
    pub message: String,
    pub author: AgentId,
    /// path -> full new content
    pub files: BTreeMap<String, String>,
}

/// Identifier returned by a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitId(pub String);

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Store verdict on a claim request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Accepted,
    /// Another agent holds an overlapping pattern.
    Rejected { conflicts: Vec<String> },
}

impl ClaimOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ClaimOutcome::Accepted)
    }
}

/// Remote versioned store shared by every worker.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Entries directly under `dir`.
    async fn list(&self, dir: &str) -> Result<Vec<TreeEntry>, StoreError>;

    /// File content, or `None` when the path does not exist.
    async fn read(&self, path: &str) -> Result<Option<String>, StoreError>;

    async fn commit(&self, request: &CommitRequest) -> Result<CommitId, StoreError>;

    async fn claim(
        &self,
        agent: &AgentId,
        patterns: &[String],
        reason: &str,
    ) -> Result<ClaimOutcome, StoreError>;

    async fn release(&self, agent: &AgentId, patterns: &[String]) -> Result<(), StoreError>;
}
