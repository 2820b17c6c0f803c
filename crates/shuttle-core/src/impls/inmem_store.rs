//! InMemoryStore - 開発用・テスト用の remote store
//!
//! RemoteStore と EventStream の両方を 1 つの状態で実装します。
//!
//! # 実装詳細
//! - tokio Mutex で状態を排他制御（ロック跨ぎ await しない）
//! - publish 時に Notify で long-poll 中の reader を起こす
//! - claim の重なり判定は glob 同士も考慮（`src/a*` と `src/*b` は重なる）

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::{AgentId, EventPage, StoreError, StoreErrorKind, StreamEvent, StreamOffset};
use crate::ports::{
    ClaimOutcome, CommitId, CommitRequest, EventStream, RemoteStore, TreeEntry,
};

/// A live claim held by one agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRecord {
    pub agent: AgentId,
    pub pattern: String,
    pub reason: String,
}

/// A commit as recorded by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub id: CommitId,
    pub message: String,
    pub author: AgentId,
    pub paths: Vec<String>,
}

#[derive(Default)]
struct Faults {
    /// Next N calls of any kind fail with RateLimited.
    rate_limited: u32,
    /// Next N commits fail with Rejected.
    failing_commits: u32,
    failing_publishes: bool,
}

#[derive(Default)]
struct StoreState {
    files: BTreeMap<String, String>,
    commits: Vec<CommitRecord>,
    claims: Vec<ClaimRecord>,
    events: Vec<StreamEvent>,
    faults: Faults,
}

impl StoreState {
    fn take_rate_limit(&mut self, op: &str) -> Result<(), StoreError> {
        if self.faults.rate_limited > 0 {
            self.faults.rate_limited -= 1;
            return Err(StoreError::rate_limited(format!("{op}: too many requests")));
        }
        Ok(())
    }

    fn conflicts(&self, agent: &AgentId, patterns: &[String]) -> Vec<String> {
        let mut conflicts = BTreeSet::new();
        for held in self.claims.iter().filter(|c| &c.agent != agent) {
            if patterns.iter().any(|p| patterns_overlap(p, &held.pattern)) {
                conflicts.insert(held.pattern.clone());
            }
        }
        conflicts.into_iter().collect()
    }
}

/// In-memory store bound to a single branch.
#[derive(Clone)]
pub struct InMemoryStore {
    branch: String,
    state: Arc<Mutex<StoreState>>,
    notify: Arc<Notify>,
}

impl InMemoryStore {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            state: Arc::new(Mutex::new(StoreState::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Write a file directly, outside of any commit.
    pub async fn seed(&self, path: impl Into<String>, content: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.files.insert(path.into(), content.into());
    }

    pub async fn file(&self, path: &str) -> Option<String> {
        let state = self.state.lock().await;
        state.files.get(path).cloned()
    }

    pub async fn claims(&self) -> Vec<ClaimRecord> {
        let state = self.state.lock().await;
        state.claims.clone()
    }

    pub async fn commits(&self) -> Vec<CommitRecord> {
        let state = self.state.lock().await;
        state.commits.clone()
    }

    pub async fn events(&self) -> Vec<StreamEvent> {
        let state = self.state.lock().await;
        state.events.clone()
    }

    /// Make the next `n` calls fail with a rate-limit error.
    pub async fn rate_limit_next(&self, n: u32) {
        self.state.lock().await.faults.rate_limited = n;
    }

    /// Make the next `n` commits fail.
    pub async fn fail_next_commits(&self, n: u32) {
        self.state.lock().await.faults.failing_commits = n;
    }

    pub async fn fail_publishes(&self, fail: bool) {
        self.state.lock().await.faults.failing_publishes = fail;
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn list(&self, dir: &str) -> Result<Vec<TreeEntry>, StoreError> {
        let mut state = self.state.lock().await;
        state.take_rate_limit("list")?;

        let dir = dir.trim_matches('/');
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };

        let mut blobs = BTreeSet::new();
        let mut trees = BTreeSet::new();
        for path in state.files.keys() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((sub, _)) => {
                    trees.insert(sub.to_string());
                }
                None => {
                    blobs.insert(rest.to_string());
                }
            }
        }

        let mut entries: Vec<TreeEntry> = trees.into_iter().map(TreeEntry::tree).collect();
        entries.extend(blobs.into_iter().map(TreeEntry::blob));
        Ok(entries)
    }

    async fn read(&self, path: &str) -> Result<Option<String>, StoreError> {
        let mut state = self.state.lock().await;
        state.take_rate_limit("read")?;
        Ok(state.files.get(path).cloned())
    }

    async fn commit(&self, request: &CommitRequest) -> Result<CommitId, StoreError> {
        let mut state = self.state.lock().await;
        state.take_rate_limit("commit")?;

        if request.branch != self.branch {
            return Err(StoreError::new(
                StoreErrorKind::NotFound,
                format!("unknown branch {}", request.branch),
            ));
        }
        if state.faults.failing_commits > 0 {
            state.faults.failing_commits -= 1;
            return Err(StoreError::rejected("commit rejected"));
        }
        if request.files.is_empty() {
            return Err(StoreError::rejected("empty commit"));
        }

        for (path, content) in &request.files {
            state.files.insert(path.clone(), content.clone());
        }
        let id = CommitId(format!("{:040x}", state.commits.len() + 1));
        state.commits.push(CommitRecord {
            id: id.clone(),
            message: request.message.clone(),
            author: request.author.clone(),
            paths: request.files.keys().cloned().collect(),
        });
        Ok(id)
    }

    async fn claim(
        &self,
        agent: &AgentId,
        patterns: &[String],
        reason: &str,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut state = self.state.lock().await;
        state.take_rate_limit("claim")?;

        let conflicts = state.conflicts(agent, patterns);
        if !conflicts.is_empty() {
            return Ok(ClaimOutcome::Rejected { conflicts });
        }

        for pattern in patterns {
            let already_held = state
                .claims
                .iter()
                .any(|c| &c.agent == agent && &c.pattern == pattern);
            if !already_held {
                state.claims.push(ClaimRecord {
                    agent: agent.clone(),
                    pattern: pattern.clone(),
                    reason: reason.to_string(),
                });
            }
        }
        Ok(ClaimOutcome::Accepted)
    }

    async fn release(&self, agent: &AgentId, patterns: &[String]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.take_rate_limit("release")?;
        state
            .claims
            .retain(|c| &c.agent != agent || !patterns.contains(&c.pattern));
        Ok(())
    }
}

#[async_trait]
impl EventStream for InMemoryStore {
    async fn publish(&self, event: &StreamEvent) -> Result<(), StoreError> {
        {
            let mut state = self.state.lock().await;
            state.take_rate_limit("publish")?;
            if state.faults.failing_publishes {
                return Err(StoreError::transport("event stream unavailable"));
            }
            state.events.push(event.clone());
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn read_events(
        &self,
        from: Option<&StreamOffset>,
        limit: usize,
        wait: Option<Duration>,
    ) -> Result<EventPage, StoreError> {
        let start = match from {
            None => 0,
            Some(offset) => offset.as_str().parse::<usize>().map_err(|_| {
                StoreError::rejected(format!("invalid stream offset {offset}"))
            })?,
        };
        let deadline = wait.map(|w| Instant::now() + w);
        let mut tail;

        loop {
            // 登録してから状態を見る（notify_waiters の取りこぼし防止）
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                state.take_rate_limit("read_events")?;
                let start = start.min(state.events.len());
                tail = start;
                let end = start.saturating_add(limit).min(state.events.len());
                if end > start || deadline.is_none() {
                    return Ok(EventPage {
                        events: state.events[start..end].to_vec(),
                        next_offset: StreamOffset::new(end.to_string()),
                        skipped: 0,
                    });
                }
            }

            let Some(deadline) = deadline else {
                continue;
            };
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(EventPage {
                    events: Vec::new(),
                    next_offset: StreamOffset::new(tail.to_string()),
                    skipped: 0,
                });
            }
        }
    }
}

/// Whether two claim patterns can denote a common path.
///
/// Globs: `**` matches anything, `*` anything but `/`, `?` one non-`/`
/// character. Two globs overlap when some path matches both, so
/// `src/a*` and `src/*b` conflict (`src/ab`).
pub fn patterns_overlap(a: &str, b: &str) -> bool {
    a == b || intersects(&tokens(a), &tokens(b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Char(char),
    /// `?`
    One,
    /// `*`
    Segment,
    /// `**`
    Any,
}

impl Token {
    fn is_star(self) -> bool {
        matches!(self, Token::Segment | Token::Any)
    }

    /// Single-character tokens that can agree on one character.
    fn agree(self, other: Token) -> bool {
        match (self, other) {
            (Token::Char(x), Token::Char(y)) => x == y,
            (Token::Char(c), Token::One) | (Token::One, Token::Char(c)) => c != '/',
            _ => true,
        }
    }

    /// Whether a star can swallow the character `single` stands for.
    fn swallows(self, single: Token) -> bool {
        match (self, single) {
            (Token::Any, _) => true,
            (Token::Segment, Token::Char(c)) => c != '/',
            (Token::Segment, _) => true,
            _ => false,
        }
    }
}

fn tokens(pattern: &str) -> Vec<Token> {
    let mut out = Vec::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(match c {
            '*' if chars.next_if_eq(&'*').is_some() => Token::Any,
            '*' => Token::Segment,
            '?' => Token::One,
            c => Token::Char(c),
        });
    }
    out
}

/// Whether some path matches both token sequences.
fn intersects(a: &[Token], b: &[Token]) -> bool {
    match (a.first().copied(), b.first().copied()) {
        (None, None) => true,
        (None, Some(_)) => b.iter().all(|t| t.is_star()),
        (Some(_), None) => a.iter().all(|t| t.is_star()),
        // どちらかの star が先に終わる
        (Some(x), Some(y)) if x.is_star() && y.is_star() => {
            intersects(&a[1..], b) || intersects(a, &b[1..])
        }
        (Some(x), Some(y)) if x.is_star() => {
            intersects(&a[1..], b) || (x.swallows(y) && intersects(a, &b[1..]))
        }
        (Some(x), Some(y)) if y.is_star() => {
            intersects(a, &b[1..]) || (y.swallows(x) && intersects(&a[1..], b))
        }
        (Some(x), Some(y)) => x.agree(y) && intersects(&a[1..], &b[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn patterns(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[rstest]
    #[case("src/a.py", "src/a.py", true)]
    #[case("src/a.py", "src/b.py", false)]
    #[case("src/*.py", "src/a.py", true)]
    #[case("src/*.py", "src/models/a.py", false)]
    #[case("src/**", "src/models/a.py", true)]
    #[case("src/?.py", "src/ab.py", false)]
    #[case("src/a*.py", "src/*.py", true)]
    #[case("src/a*", "src/*b", true)]
    #[case("src/a*.py", "src/b*.py", false)]
    #[case("src/*.py", "src/*.rs", false)]
    #[case("src/**", "src/*/x.py", true)]
    #[case("src/*/a.py", "src/**/b.py", false)]
    #[case("src/?.py", "src/*.py", true)]
    #[case("*", "src/a.py", false)]
    fn overlap(#[case] a: &str, #[case] b: &str, #[case] expected: bool) {
        assert_eq!(patterns_overlap(a, b), expected);
        assert_eq!(patterns_overlap(b, a), expected);
    }

    #[tokio::test]
    async fn commit_is_atomic_and_listing_sees_it() {
        let store = InMemoryStore::new("main");
        let mut files = BTreeMap::new();
        files.insert("tasks/001-a.md".to_string(), "a".to_string());
        files.insert("src/a.py".to_string(), "print()".to_string());
        files.insert("src/pkg/b.py".to_string(), "".to_string());
        let request = CommitRequest {
            branch: "main".to_string(),
            message: "init".to_string(),
            author: AgentId::new("worker-1"),
            files,
        };

        store.fail_next_commits(1).await;
        assert!(store.commit(&request).await.is_err());
        assert_eq!(store.read("src/a.py").await.unwrap(), None);

        store.commit(&request).await.unwrap();
        assert_eq!(store.read("src/a.py").await.unwrap().as_deref(), Some("print()"));
        assert_eq!(
            store.list("src").await.unwrap(),
            vec![TreeEntry::tree("pkg"), TreeEntry::blob("a.py")]
        );
        assert!(store.list("missing").await.unwrap().is_empty());
        assert_eq!(store.commits().await.len(), 1);
    }

    #[tokio::test]
    async fn commit_to_unknown_branch_fails() {
        let store = InMemoryStore::new("main");
        let request = CommitRequest {
            branch: "dev".to_string(),
            message: "x".to_string(),
            author: AgentId::new("worker-1"),
            files: BTreeMap::from([("a".to_string(), "b".to_string())]),
        };
        let err = store.commit(&request).await.unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::NotFound);
    }

    #[tokio::test]
    async fn overlapping_claims_are_rejected_until_released() {
        let store = InMemoryStore::new("main");
        let w1 = AgentId::new("worker-1");
        let w2 = AgentId::new("worker-2");

        let first = store
            .claim(&w1, &patterns(&["tasks/001-a.md", "src/*.py"]), "a")
            .await
            .unwrap();
        assert!(first.is_accepted());

        let second = store
            .claim(&w2, &patterns(&["tasks/002-b.md", "src/b.py"]), "b")
            .await
            .unwrap();
        assert_eq!(
            second,
            ClaimOutcome::Rejected {
                conflicts: patterns(&["src/*.py"])
            }
        );
        // all-or-nothing: nothing of the rejected set is held
        assert!(store.claims().await.iter().all(|c| c.agent == w1));

        // release by someone else is a no-op
        store.release(&w2, &patterns(&["src/*.py"])).await.unwrap();
        assert_eq!(store.claims().await.len(), 2);

        store
            .release(&w1, &patterns(&["tasks/001-a.md", "src/*.py"]))
            .await
            .unwrap();
        store
            .release(&w1, &patterns(&["tasks/001-a.md", "src/*.py"]))
            .await
            .unwrap();
        assert!(store.claims().await.is_empty());

        let retry = store
            .claim(&w2, &patterns(&["tasks/002-b.md", "src/b.py"]), "b")
            .await
            .unwrap();
        assert!(retry.is_accepted());
    }

    #[tokio::test]
    async fn reclaiming_own_patterns_is_accepted() {
        let store = InMemoryStore::new("main");
        let w1 = AgentId::new("worker-1");
        let set = patterns(&["tasks/001-a.md"]);
        assert!(store.claim(&w1, &set, "a").await.unwrap().is_accepted());
        assert!(store.claim(&w1, &set, "a").await.unwrap().is_accepted());
        assert_eq!(store.claims().await.len(), 1);
    }

    #[tokio::test]
    async fn read_events_pages_and_times_out_at_the_tail() {
        let store = InMemoryStore::new("main");
        for i in 0..3 {
            let event = StreamEvent::new(crate::domain::EventKind::FileWrite, AgentId::new("w"))
                .with("n", i);
            store.publish(&event).await.unwrap();
        }

        let page = store.read_events(None, 2, None).await.unwrap();
        assert_eq!(page.events.len(), 2);
        assert_eq!(page.next_offset, StreamOffset::new("2"));

        let page = store
            .read_events(Some(&page.next_offset), 10, None)
            .await
            .unwrap();
        assert_eq!(page.events.len(), 1);

        let tail = store
            .read_events(Some(&page.next_offset), 10, Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(tail.events.is_empty());
        assert_eq!(tail.next_offset, StreamOffset::new("3"));

        let beyond = store
            .read_events(Some(&StreamOffset::new("10")), 10, Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(beyond.events.is_empty());
        assert_eq!(beyond.next_offset, StreamOffset::new("3"));

        let bad = store
            .read_events(Some(&StreamOffset::new("abc")), 10, None)
            .await;
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn injected_rate_limits_are_consumed() {
        let store = InMemoryStore::new("main");
        store.rate_limit_next(2).await;
        assert!(store.read("x").await.unwrap_err().is_rate_limited());
        assert!(store.list("").await.unwrap_err().is_rate_limited());
        assert_eq!(store.read("x").await.unwrap(), None);
    }
}
