//! Events - ストリームイベント
//!
//! The store keeps an append-only, offset-addressable log of
//! `{type, agent_id, ...payload}` records. Workers publish lifecycle events to
//! it; operators and other agents tail it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::AgentId;

/// Event type tag (`type` on the wire).
///
/// Unknown tags from other producers are kept as `Other` so tailing never
/// drops records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    AgentJoin,
    AgentClaim,
    AgentRelease,
    AgentLeave,
    TaskCompleted,
    Error,
    /// Partial progress, debounced.
    FileChunk,
    /// A file finished; never debounced.
    FileWrite,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::AgentJoin => "agent_join",
            EventKind::AgentClaim => "agent_claim",
            EventKind::AgentRelease => "agent_release",
            EventKind::AgentLeave => "agent_leave",
            EventKind::TaskCompleted => "task_completed",
            EventKind::Error => "error",
            EventKind::FileChunk => "file_chunk",
            EventKind::FileWrite => "file_write",
            EventKind::Other(s) => s,
        }
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "agent_join" => EventKind::AgentJoin,
            "agent_claim" => EventKind::AgentClaim,
            "agent_release" => EventKind::AgentRelease,
            "agent_leave" => EventKind::AgentLeave,
            "task_completed" => EventKind::TaskCompleted,
            "error" => EventKind::Error,
            "file_chunk" => EventKind::FileChunk,
            "file_write" => EventKind::FileWrite,
            _ => EventKind::Other(s),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record of the event stream. Payload fields sit next to `type` and
/// `agent_id` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub agent_id: AgentId,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl StreamEvent {
    pub fn new(kind: EventKind, agent_id: AgentId) -> Self {
        Self {
            kind,
            agent_id,
            payload: Map::new(),
        }
    }

    /// Add a payload field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// Opaque stream position handed out by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamOffset(String);

impl StreamOffset {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Result of one `read_events` call. Reading again from `next_offset` yields
/// exactly the records after this page.
#[derive(Debug, Clone, PartialEq)]
pub struct EventPage {
    pub events: Vec<StreamEvent>,
    pub next_offset: StreamOffset,
    /// Records inside this page that could not be decoded. `next_offset`
    /// already points past them.
    pub skipped: usize,
}
