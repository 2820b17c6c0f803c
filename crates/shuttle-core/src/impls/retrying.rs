//! Retrying - RetryPolicy を全呼び出しに適用するデコレータ
//!
//! RemoteStore / EventStream のどちらも包めます。long-poll 付きの
//! read_events もそのまま再試行します（待ち時間は呼び出しごとにリセット）。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::app::retry::RetryPolicy;
use crate::domain::{AgentId, EventPage, StoreError, StreamEvent, StreamOffset};
use crate::ports::{ClaimOutcome, CommitId, CommitRequest, EventStream, RemoteStore, TreeEntry};

pub struct Retrying<S: ?Sized> {
    inner: Arc<S>,
    policy: RetryPolicy,
}

impl<S: ?Sized> Retrying<S> {
    pub fn new(inner: Arc<S>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<S: RemoteStore + ?Sized> RemoteStore for Retrying<S> {
    async fn list(&self, dir: &str) -> Result<Vec<TreeEntry>, StoreError> {
        self.policy.run("list", || self.inner.list(dir)).await
    }

    async fn read(&self, path: &str) -> Result<Option<String>, StoreError> {
        self.policy.run("read", || self.inner.read(path)).await
    }

    async fn commit(&self, request: &CommitRequest) -> Result<CommitId, StoreError> {
        self.policy.run("commit", || self.inner.commit(request)).await
    }

    async fn claim(
        &self,
        agent: &AgentId,
        patterns: &[String],
        reason: &str,
    ) -> Result<ClaimOutcome, StoreError> {
        self.policy
            .run("claim", || self.inner.claim(agent, patterns, reason))
            .await
    }

    async fn release(&self, agent: &AgentId, patterns: &[String]) -> Result<(), StoreError> {
        self.policy
            .run("release", || self.inner.release(agent, patterns))
            .await
    }
}

#[async_trait]
impl<S: EventStream + ?Sized> EventStream for Retrying<S> {
    async fn publish(&self, event: &StreamEvent) -> Result<(), StoreError> {
        self.policy.run("publish", || self.inner.publish(event)).await
    }

    async fn read_events(
        &self,
        from: Option<&StreamOffset>,
        limit: usize,
        wait: Option<Duration>,
    ) -> Result<EventPage, StoreError> {
        self.policy
            .run("read_events", || self.inner.read_events(from, limit, wait))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StoreErrorKind;
    use crate::impls::InMemoryStore;
    use std::collections::BTreeMap;
    use tokio::time::Instant;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            jitter: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_calls_are_retried_transparently() {
        let store = Arc::new(InMemoryStore::new("main"));
        store.seed("tasks/001-a.md", "---\nstatus: pending\n---\n").await;
        store.rate_limit_next(2).await;
        let retrying = Retrying::new(store.clone(), fast_policy());
        let started = Instant::now();

        let content = retrying.read("tasks/001-a.md").await.unwrap();

        assert!(content.is_some());
        // 2s + 4s
        assert!(started.elapsed() >= Duration::from_secs(6));
        assert!(started.elapsed() < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_pass_through_without_sleeping() {
        let store = Arc::new(InMemoryStore::new("main"));
        let retrying = Retrying::new(store, fast_policy());
        let started = Instant::now();

        let request = CommitRequest {
            branch: "release".to_string(),
            message: "x".to_string(),
            author: AgentId::new("worker-1"),
            files: BTreeMap::from([("a".to_string(), "b".to_string())]),
        };
        let err = retrying.commit(&request).await.unwrap_err();

        assert_eq!(err.kind(), StoreErrorKind::NotFound);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn wraps_trait_objects() {
        let store = Arc::new(InMemoryStore::new("main"));
        let stream: Arc<dyn EventStream> = store.clone();
        store.rate_limit_next(1).await;

        let retrying = Retrying::new(stream, fast_policy());
        retrying
            .publish(&StreamEvent::new(
                crate::domain::EventKind::AgentJoin,
                AgentId::new("worker-1"),
            ))
            .await
            .unwrap();

        assert_eq!(store.events().await.len(), 1);
    }
}
