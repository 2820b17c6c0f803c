//! Task descriptor: the unit of work stored as a file in the remote store.

use std::collections::BTreeSet;

use super::errors::TransitionError;
use super::ids::{AgentId, TaskId};
use super::status::TaskStatus;

/// Default advisory priority when the metadata omits it.
pub const DEFAULT_PRIORITY: u8 = 3;

/// Metadata + body of one task.
///
/// Design:
/// - `status` and `claimed_by` change only through `start` / `complete`, which
///   enforce `pending -> in_progress -> completed`.
/// - Everything else is plain data; the core never interprets `title` / `body`.
/// - `extra` keeps unrecognized metadata lines in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    /// Storage key, e.g. `tasks/001-setup.md`.
    pub key: String,
    pub id: TaskId,
    status: TaskStatus,
    claimed_by: Option<AgentId>,
    /// Advisory only: selection order is storage-key order.
    pub priority: u8,
    pub depends_on: BTreeSet<TaskId>,
    /// File patterns this task may create/modify; also claim targets.
    pub owns: BTreeSet<String>,
    pub title: String,
    pub body: String,
    pub extra: Vec<ExtraField>,
}

/// An unrecognized metadata line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField {
    /// `name: raw value`
    Entry(String, String),
    /// A line without a `name:` prefix, kept as written.
    Verbatim(String),
}

impl ExtraField {
    pub fn entry(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Entry(name.into(), value.into())
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Entry(name, _) => Some(name),
            Self::Verbatim(_) => None,
        }
    }
}

impl TaskDescriptor {
    /// A fresh pending descriptor; the title is taken from the body.
    pub fn new(key: impl Into<String>, body: impl Into<String>) -> Self {
        let key = key.into();
        let body = body.into();
        Self {
            id: TaskId::from_key(&key),
            key,
            status: TaskStatus::Pending,
            claimed_by: None,
            priority: DEFAULT_PRIORITY,
            depends_on: BTreeSet::new(),
            owns: BTreeSet::new(),
            title: extract_title(&body),
            body,
            extra: Vec::new(),
        }
    }

    /// Raw construction for the codec: decoded text may carry any combination.
    pub(crate) fn from_parts(
        key: String,
        status: TaskStatus,
        claimed_by: Option<AgentId>,
        body: String,
    ) -> Self {
        let mut descriptor = Self::new(key, body);
        descriptor.status = status;
        descriptor.claimed_by = claimed_by;
        descriptor
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_owns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.owns.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn claimed_by(&self) -> Option<&AgentId> {
        self.claimed_by.as_ref()
    }

    /// Pending and nobody recorded as claimant.
    pub fn is_claimable(&self) -> bool {
        self.status == TaskStatus::Pending && self.claimed_by.is_none()
    }

    /// Claim targets: the descriptor key first, then the owned patterns.
    pub fn claim_patterns(&self) -> Vec<String> {
        let mut patterns = Vec::with_capacity(self.owns.len() + 1);
        patterns.push(self.key.clone());
        patterns.extend(self.owns.iter().filter(|p| **p != self.key).cloned());
        patterns
    }

    /// `pending -> in_progress`, recording the claimant.
    pub fn start(&self, agent: &AgentId) -> Result<Self, TransitionError> {
        let mut next = self.advance(TaskStatus::InProgress)?;
        next.claimed_by = Some(agent.clone());
        Ok(next)
    }

    /// `in_progress -> completed`; the claimant stays recorded.
    pub fn complete(&self) -> Result<Self, TransitionError> {
        self.advance(TaskStatus::Completed)
    }

    fn advance(&self, to: TaskStatus) -> Result<Self, TransitionError> {
        if !self.status.can_advance_to(to) {
            return Err(TransitionError {
                task: self.id.clone(),
                from: self.status,
                to,
            });
        }
        let mut next = self.clone();
        next.status = to;
        Ok(next)
    }
}

/// First level-1 heading (`# Title`) of the body, or an empty string.
pub fn extract_title(body: &str) -> String {
    body.lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|title| title.trim().to_string())
        .unwrap_or_default()
}
