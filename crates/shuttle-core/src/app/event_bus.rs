//! EventBus - ライフサイクルイベントの best-effort 発行と読み出し
//!
//! 発行の失敗はログに残して握りつぶします（telemetry がワーカーを止めない）。
//! 読み出し側の EventCursor は offset を覚えて欠落・重複なく再開します。

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use crate::domain::{
    AgentId, EventKind, StoreError, StreamEvent, StreamOffset, TaskDescriptor, TaskId,
};
use crate::ports::{CommitId, EventStream};

/// Publisher bound to one agent.
#[derive(Clone)]
pub struct EventBus {
    stream: Arc<dyn EventStream>,
    agent: AgentId,
}

impl EventBus {
    pub fn new(stream: Arc<dyn EventStream>, agent: AgentId) -> Self {
        Self { stream, agent }
    }

    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    /// Publish, logging and swallowing any failure.
    pub async fn publish(&self, event: StreamEvent) {
        match self.stream.publish(&event).await {
            Ok(()) => debug!(kind = %event.kind, "event published"),
            Err(e) => warn!(kind = %event.kind, error = %e, "event publish failed"),
        }
    }

    fn event(&self, kind: EventKind) -> StreamEvent {
        StreamEvent::new(kind, self.agent.clone())
    }

    pub async fn join(&self, role: &str) {
        let event = self
            .event(EventKind::AgentJoin)
            .with("agent_name", self.agent.as_str())
            .with("role", role);
        self.publish(event).await;
    }

    pub async fn leave(&self, role: &str, tasks_completed: u32) {
        let event = self
            .event(EventKind::AgentLeave)
            .with("role", role)
            .with("tasks_completed", tasks_completed);
        self.publish(event).await;
    }

    pub async fn claimed(&self, patterns: &[String], reason: &str) {
        let event = self
            .event(EventKind::AgentClaim)
            .with("patterns", json!(patterns))
            .with("reason", reason);
        self.publish(event).await;
    }

    pub async fn released(&self, patterns: &[String]) {
        let event = self
            .event(EventKind::AgentRelease)
            .with("patterns", json!(patterns));
        self.publish(event).await;
    }

    pub async fn error(&self, task: Option<&TaskId>, error: &str) {
        let mut event = self.event(EventKind::Error).with("error", error);
        if let Some(task) = task {
            event = event.with("task_id", task.as_str());
        }
        self.publish(event).await;
    }

    /// Partial content of `path`; `version` is the content length.
    pub fn file_chunk_event(&self, path: &str, content: &str) -> StreamEvent {
        self.event(EventKind::FileChunk)
            .with("path", path)
            .with("content", content)
            .with("version", content.chars().count())
    }

    pub async fn file_chunk(&self, path: &str, content: &str) {
        self.publish(self.file_chunk_event(path, content)).await;
    }

    pub async fn file_write(&self, path: &str, content: &str) {
        let event = self
            .event(EventKind::FileWrite)
            .with("path", path)
            .with("content", content);
        self.publish(event).await;
    }

    pub async fn task_completed(&self, task: &TaskDescriptor, commit: &CommitId) {
        let event = self
            .event(EventKind::TaskCompleted)
            .with("task_id", task.id.as_str())
            .with("title", task.title.as_str())
            .with("commit", commit.0.as_str());
        self.publish(event).await;
    }
}

/// Resumable reader over the event stream.
pub struct EventCursor {
    stream: Arc<dyn EventStream>,
    offset: Option<StreamOffset>,
    limit: usize,
    skipped: usize,
}

impl EventCursor {
    /// Start at `offset`, or at the beginning of the stream.
    pub fn new(stream: Arc<dyn EventStream>, offset: Option<StreamOffset>) -> Self {
        Self {
            stream,
            offset,
            limit: 100,
            skipped: 0,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Where the next read starts; persist this to resume later.
    pub fn offset(&self) -> Option<&StreamOffset> {
        self.offset.as_ref()
    }

    /// Undecodable records passed over so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Next page without waiting. Empty at the tail.
    pub async fn next_page(&mut self) -> Result<Vec<StreamEvent>, StoreError> {
        self.read(None).await
    }

    /// Next page, long-polling up to `wait` at the tail.
    pub async fn follow(&mut self, wait: Duration) -> Result<Vec<StreamEvent>, StoreError> {
        self.read(Some(wait)).await
    }

    async fn read(&mut self, wait: Option<Duration>) -> Result<Vec<StreamEvent>, StoreError> {
        let page = self
            .stream
            .read_events(self.offset.as_ref(), self.limit, wait)
            .await?;
        if page.skipped > 0 {
            warn!(
                skipped = page.skipped,
                from = self.offset.as_ref().map(StreamOffset::as_str).unwrap_or("start"),
                to = %page.next_offset,
                "stream page had undecodable events"
            );
            self.skipped += page.skipped;
        }
        self.offset = Some(page.next_offset);
        Ok(page.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryStore;

    fn bus(store: &Arc<InMemoryStore>, agent: &str) -> EventBus {
        EventBus::new(store.clone(), AgentId::new(agent))
    }

    #[tokio::test]
    async fn lifecycle_events_carry_their_payload() {
        let store = Arc::new(InMemoryStore::new("main"));
        let bus = bus(&store, "worker-1");

        bus.join("worker").await;
        bus.claimed(&["tasks/001-a.md".to_string()], "Implementing task: A")
            .await;
        bus.file_chunk("src/a.py", "print(1)").await;
        bus.leave("worker", 1).await;

        let events = store.events().await;
        let kinds: Vec<_> = events.iter().map(|e| e.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::AgentJoin,
                EventKind::AgentClaim,
                EventKind::FileChunk,
                EventKind::AgentLeave,
            ]
        );
        assert_eq!(events[1].get("patterns"), Some(&json!(["tasks/001-a.md"])));
        assert_eq!(events[2].get("version"), Some(&json!(8)));
        assert_eq!(events[3].get("tasks_completed"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn publish_failures_are_swallowed() {
        let store = Arc::new(InMemoryStore::new("main"));
        store.fail_publishes(true).await;
        let bus = bus(&store, "worker-1");

        bus.error(None, "api_credits_exhausted").await;

        assert!(store.events().await.is_empty());
    }

    #[tokio::test]
    async fn cursor_resumes_without_loss_or_duplication() {
        let store = Arc::new(InMemoryStore::new("main"));
        let bus = bus(&store, "worker-1");
        for i in 0..5 {
            bus.file_write(&format!("src/{i}.py"), "x").await;
        }

        let mut cursor = EventCursor::new(store.clone(), None).with_limit(3);
        let first = cursor.next_page().await.unwrap();
        assert_eq!(first.len(), 3);

        let saved = cursor.offset().cloned();
        bus.file_write("src/5.py", "x").await;

        let mut resumed = EventCursor::new(store.clone(), saved);
        let rest = resumed.next_page().await.unwrap();
        let paths: Vec<_> = rest.iter().filter_map(|e| e.get_str("path")).collect();
        assert_eq!(paths, vec!["src/3.py", "src/4.py", "src/5.py"]);

        assert!(resumed.next_page().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn follow_wakes_up_on_new_events() {
        let store = Arc::new(InMemoryStore::new("main"));
        let mut cursor = EventCursor::new(store.clone(), None);
        assert!(cursor.next_page().await.unwrap().is_empty());

        let publisher = bus(&store, "worker-2");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.join("worker").await;
        });

        let events = cursor.follow(Duration::from_secs(5)).await.unwrap();
        handle.await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].agent_id, AgentId::new("worker-2"));
    }
}
