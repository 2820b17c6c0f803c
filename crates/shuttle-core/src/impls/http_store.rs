//! HttpStore - HTTP API 上の RemoteStore / EventStream
//!
//! # エンドポイント
//! - `GET  /api/v1/stores/{store}/repos/{repo}/tree/{branch}/{dir}`
//! - `GET  /api/v1/stores/{store}/repos/{repo}/files/{branch}/{path}`（path は 1 segment に encode）
//! - `POST /api/v1/stores/{store}/repos/{repo}/commits`
//! - `POST | DELETE /stores/{store}/repos/{repo}/branches/{branch}/coordinate/claim`
//! - `POST | GET /api/v1/stores/{store}/repos/{repo}/streams/events`
//!
//! # ステータスの扱い
//! - 429 → RateLimited（RetryPolicy が再試行する唯一の種別）
//! - 409 / body の `claim_conflict` → claim は Rejected
//! - 404 → read は None、list は空、release は成功扱い
//! - read は `application/json` なら `{content}` envelope、それ以外は本文そのもの

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::domain::{AgentId, EventPage, StoreError, StoreErrorKind, StreamEvent, StreamOffset};
use crate::ports::{
    ClaimOutcome, CommitId, CommitRequest, EventStream, RemoteStore, TreeEntry,
};

const NEXT_OFFSET_HEADER: &str = "stream-next-offset";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpStore {
    client: Client,
    base_url: Url,
    api_key: String,
    store: String,
    repo: String,
    branch: String,
}

#[derive(Deserialize)]
struct RawEntry {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TreeResponse {
    Wrapped { entries: Vec<RawEntry> },
    Bare(Vec<RawEntry>),
}

#[derive(Deserialize)]
struct FileResponse {
    content: String,
}

#[derive(Serialize)]
struct CommitAuthor<'a> {
    name: &'a str,
    email: String,
}

#[derive(Serialize)]
struct CommitFile<'a> {
    path: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct CommitBody<'a> {
    branch: &'a str,
    message: &'a str,
    author: CommitAuthor<'a>,
    files: Vec<CommitFile<'a>>,
}

#[derive(Deserialize)]
struct CommitResponse {
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    commit: Option<CommitInfo>,
}

#[derive(Deserialize)]
struct CommitInfo {
    commit_sha: String,
}

#[derive(Serialize)]
struct ClaimBody<'a> {
    agent_id: &'a str,
    patterns: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    claim: Option<&'a str>,
}

#[derive(Deserialize, Default)]
struct ClaimResponse {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    conflicts: Vec<ClaimConflict>,
}

#[derive(Deserialize)]
struct ClaimConflict {
    #[serde(default)]
    patterns: Vec<String>,
}

#[derive(Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<Value>,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpStore {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        store: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| StoreError::rejected(format!("invalid base url {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::rejected(format!("invalid base url {base_url}")));
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
            store: store.into(),
            repo: repo.into(),
            branch: branch.into(),
        })
    }

    pub fn from_config(config: &StoreConfig, api_key: impl Into<String>) -> Result<Self, StoreError> {
        Self::new(
            &config.base_url,
            api_key,
            config.store.clone(),
            config.repo.clone(),
            config.branch.clone(),
        )
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::rejected("base url cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `/api/v1/stores/{store}/repos/{repo}/...`
    fn repo_url<'a>(&'a self, rest: impl IntoIterator<Item = &'a str>) -> Result<Url, StoreError> {
        let prefix = ["api", "v1", "stores", self.store.as_str(), "repos", self.repo.as_str()];
        self.url(prefix.into_iter().chain(rest))
    }

    /// The coordination API lives outside `/api/v1`.
    fn claim_url(&self) -> Result<Url, StoreError> {
        self.url([
            "stores",
            self.store.as_str(),
            "repos",
            self.repo.as_str(),
            "branches",
            self.branch.as_str(),
            "coordinate",
            "claim",
        ])
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url).bearer_auth(&self.api_key)
    }

    async fn send(&self, op: &str, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::transport(format!("{op}: {e}")))?;
        debug!(op, status = response.status().as_u16(), "store response");
        Ok(response)
    }

    async fn body(op: &str, response: Response) -> Result<String, StoreError> {
        response
            .text()
            .await
            .map_err(|e| StoreError::transport(format!("{op}: failed to read body: {e}")))
    }

    /// Turn a non-success response into a typed error.
    async fn fail(op: &str, response: Response) -> StoreError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        status_error(op, status, &text)
    }
}

fn status_error(op: &str, status: StatusCode, text: &str) -> StoreError {
    let body: ErrorBody = serde_json::from_str(text).unwrap_or_default();
    let detail = body
        .message
        .or(body.error)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| text.trim().to_string());
    let kind = match status {
        StatusCode::TOO_MANY_REQUESTS => StoreErrorKind::RateLimited,
        StatusCode::NOT_FOUND => StoreErrorKind::NotFound,
        StatusCode::CONFLICT => StoreErrorKind::Conflict,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreErrorKind::Unauthorized,
        s if s.is_client_error() => StoreErrorKind::Rejected,
        _ => StoreErrorKind::Transport,
    };
    StoreError::new(kind, format!("{op}: HTTP {}: {detail}", status.as_u16()))
}

fn decode<T: DeserializeOwned>(op: &str, text: &str) -> Result<T, StoreError> {
    serde_json::from_str(text).map_err(|e| StoreError::transport(format!("{op}: bad response: {e}")))
}

fn conflict_patterns(response: ClaimResponse) -> Vec<String> {
    response
        .conflicts
        .into_iter()
        .flat_map(|c| c.patterns)
        .collect()
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn list(&self, dir: &str) -> Result<Vec<TreeEntry>, StoreError> {
        let dir = dir.trim_matches('/');
        let segments = ["tree", self.branch.as_str()]
            .into_iter()
            .chain(dir.split('/').filter(|s| !s.is_empty()));
        let url = self.repo_url(segments)?;

        let response = self.send("list", self.request(Method::GET, url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(Self::fail("list", response).await);
        }

        let text = Self::body("list", response).await?;
        let entries = match decode::<TreeResponse>("list", &text)? {
            TreeResponse::Wrapped { entries } | TreeResponse::Bare(entries) => entries,
        };
        Ok(entries
            .into_iter()
            .filter_map(|e| match e.kind.as_str() {
                "blob" => Some(TreeEntry::blob(e.name)),
                "tree" => Some(TreeEntry::tree(e.name)),
                other => {
                    debug!(name = %e.name, kind = other, "skipping tree entry");
                    None
                }
            })
            .collect())
    }

    async fn read(&self, path: &str) -> Result<Option<String>, StoreError> {
        let url = self.repo_url(["files", self.branch.as_str(), path])?;

        let response = self.send("read", self.request(Method::GET, url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::fail("read", response).await);
        }

        let enveloped = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim_start().starts_with("application/json"));
        let text = Self::body("read", response).await?;
        if enveloped {
            let file: FileResponse = decode("read", &text)?;
            return Ok(Some(file.content));
        }
        Ok(Some(text))
    }

    async fn commit(&self, request: &CommitRequest) -> Result<CommitId, StoreError> {
        let url = self.repo_url(["commits"])?;
        let body = CommitBody {
            branch: &request.branch,
            message: &request.message,
            author: CommitAuthor {
                name: request.author.as_str(),
                email: request.author.email(),
            },
            files: request
                .files
                .iter()
                .map(|(path, content)| CommitFile { path, content })
                .collect(),
        };

        let response = self
            .send("commit", self.request(Method::POST, url).json(&body))
            .await?;
        if !response.status().is_success() {
            return Err(Self::fail("commit", response).await);
        }

        let text = Self::body("commit", response).await?;
        let parsed: CommitResponse = decode("commit", &text)?;
        if let Some(error) = parsed.error {
            let detail = match error {
                Value::String(s) => s,
                other => other.to_string(),
            };
            return Err(StoreError::rejected(format!("commit: {detail}")));
        }
        parsed
            .commit
            .map(|c| CommitId(c.commit_sha))
            .ok_or_else(|| StoreError::transport("commit: response has no commit sha"))
    }

    async fn claim(
        &self,
        agent: &AgentId,
        patterns: &[String],
        reason: &str,
    ) -> Result<ClaimOutcome, StoreError> {
        let url = self.claim_url()?;
        let body = ClaimBody {
            agent_id: agent.as_str(),
            patterns,
            claim: Some(reason),
        };

        let response = self
            .send("claim", self.request(Method::POST, url).json(&body))
            .await?;
        let status = response.status();
        if status == StatusCode::CONFLICT {
            let text = Self::body("claim", response).await?;
            let parsed: ClaimResponse = serde_json::from_str(&text).unwrap_or_default();
            return Ok(ClaimOutcome::Rejected {
                conflicts: conflict_patterns(parsed),
            });
        }
        if !status.is_success() {
            return Err(Self::fail("claim", response).await);
        }

        let text = Self::body("claim", response).await?;
        let parsed: ClaimResponse = if text.trim().is_empty() {
            ClaimResponse::default()
        } else {
            decode("claim", &text)?
        };
        if parsed.kind.as_deref() == Some("claim_conflict") {
            return Ok(ClaimOutcome::Rejected {
                conflicts: conflict_patterns(parsed),
            });
        }
        Ok(ClaimOutcome::Accepted)
    }

    async fn release(&self, agent: &AgentId, patterns: &[String]) -> Result<(), StoreError> {
        let url = self.claim_url()?;
        let body = ClaimBody {
            agent_id: agent.as_str(),
            patterns,
            claim: None,
        };

        let response = self
            .send("release", self.request(Method::DELETE, url).json(&body))
            .await?;
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(Self::fail("release", response).await)
    }
}

#[async_trait]
impl EventStream for HttpStore {
    async fn publish(&self, event: &StreamEvent) -> Result<(), StoreError> {
        let url = self.repo_url(["streams", "events"])?;
        let response = self
            .send("publish", self.request(Method::POST, url).json(event))
            .await?;
        if !response.status().is_success() {
            return Err(Self::fail("publish", response).await);
        }
        Ok(())
    }

    async fn read_events(
        &self,
        from: Option<&StreamOffset>,
        limit: usize,
        wait: Option<Duration>,
    ) -> Result<EventPage, StoreError> {
        let mut url = self.repo_url(["streams", "events"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &limit.to_string());
            if let Some(offset) = from {
                query.append_pair("offset", offset.as_str());
            }
            if wait.is_some() {
                query.append_pair("live", "long-poll");
            }
        }

        let mut request = self.request(Method::GET, url);
        if let Some(wait) = wait {
            request = request.timeout(wait.saturating_add(REQUEST_TIMEOUT));
        }
        let response = self.send("read_events", request).await?;
        if !response.status().is_success() {
            return Err(Self::fail("read_events", response).await);
        }

        let next_offset = response
            .headers()
            .get(NEXT_OFFSET_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(StreamOffset::new)
            .ok_or_else(|| {
                StoreError::transport(format!("read_events: missing {NEXT_OFFSET_HEADER} header"))
            })?;

        // long-poll の timeout は本文なしで返ることがある
        let text = Self::body("read_events", response).await?;
        let raw = if text.trim().is_empty() {
            Vec::new()
        } else {
            decode::<EventsResponse>("read_events", &text)?.events
        };

        let total = raw.len();
        let mut events = Vec::with_capacity(total);
        for (index, value) in raw.into_iter().enumerate() {
            match serde_json::from_value::<StreamEvent>(value) {
                Ok(event) => events.push(event),
                Err(e) => warn!(
                    offset = from.map(StreamOffset::as_str).unwrap_or("start"),
                    index,
                    next_offset = %next_offset,
                    error = %e,
                    "skipping undecodable stream event"
                ),
            }
        }
        Ok(EventPage {
            skipped: total - events.len(),
            events,
            next_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventKind;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn store(server: &Server) -> HttpStore {
        HttpStore::new(&server.url(), "secret", "acme", "todo", "main").unwrap()
    }

    fn agent() -> AgentId {
        AgentId::new("worker-1")
    }

    #[tokio::test]
    async fn list_keeps_blobs_and_trees() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/stores/acme/repos/todo/tree/main/tasks")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"entries": [
                    {"name": "001-a.md", "type": "blob"},
                    {"name": "archive", "type": "tree"},
                    {"name": "link", "type": "commit"}
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let entries = store(&server).list("tasks/").await.unwrap();

        mock.assert_async().await;
        assert_eq!(
            entries,
            vec![TreeEntry::blob("001-a.md"), TreeEntry::tree("archive")]
        );
    }

    #[tokio::test]
    async fn list_of_missing_directory_is_empty() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v1/stores/acme/repos/todo/tree/main/tasks")
            .with_status(404)
            .create_async()
            .await;

        assert!(store(&server).list("tasks").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_encodes_the_path_as_one_segment() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/stores/acme/repos/todo/files/main/tasks%2F001-a.md")
            .with_status(200)
            .with_header("content-type", "application/json; charset=utf-8")
            .with_body(json!({"content": "---\nstatus: pending\n---\n"}).to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/stores/acme/repos/todo/files/main/tasks%2F404.md")
            .with_status(404)
            .create_async()
            .await;

        let store = store(&server);
        let content = store.read("tasks/001-a.md").await.unwrap();
        assert_eq!(content.as_deref(), Some("---\nstatus: pending\n---\n"));
        assert_eq!(store.read("tasks/404.md").await.unwrap(), None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn raw_json_file_is_returned_as_is() {
        let mut server = Server::new_async().await;
        let raw = json!({"content": "not an envelope", "n": 1}).to_string();
        server
            .mock("GET", "/api/v1/stores/acme/repos/todo/files/main/config.json")
            .with_status(200)
            .with_header("content-type", "text/plain")
            .with_body(&raw)
            .create_async()
            .await;

        let content = store(&server).read("config.json").await.unwrap();
        assert_eq!(content, Some(raw));
    }

    #[tokio::test]
    async fn commit_sends_every_file_and_returns_the_sha() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/stores/acme/repos/todo/commits")
            .match_body(Matcher::PartialJson(json!({
                "branch": "main",
                "message": "Claim task: A",
                "author": {"name": "worker-1"},
                "files": [{"path": "tasks/001-a.md", "content": "x"}]
            })))
            .with_status(200)
            .with_body(json!({"commit": {"commit_sha": "abc123"}}).to_string())
            .create_async()
            .await;

        let request = CommitRequest {
            branch: "main".to_string(),
            message: "Claim task: A".to_string(),
            author: agent(),
            files: BTreeMap::from([("tasks/001-a.md".to_string(), "x".to_string())]),
        };
        let commit = store(&server).commit(&request).await.unwrap();

        mock.assert_async().await;
        assert_eq!(commit, CommitId("abc123".to_string()));
    }

    #[tokio::test]
    async fn commit_error_body_is_rejected() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/v1/stores/acme/repos/todo/commits")
            .with_status(200)
            .with_body(json!({"error": "branch is protected"}).to_string())
            .create_async()
            .await;

        let request = CommitRequest {
            branch: "main".to_string(),
            message: "m".to_string(),
            author: agent(),
            files: BTreeMap::from([("a".to_string(), "b".to_string())]),
        };
        let err = store(&server).commit(&request).await.unwrap_err();

        assert_eq!(err.kind(), StoreErrorKind::Rejected);
        assert!(err.message().contains("branch is protected"));
    }

    #[tokio::test]
    async fn claim_outcomes() {
        let mut server = Server::new_async().await;
        let path = "/stores/acme/repos/todo/branches/main/coordinate/claim";
        server
            .mock("POST", path)
            .match_body(Matcher::PartialJson(json!({"patterns": ["tasks/001-a.md"]})))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        server
            .mock("POST", path)
            .match_body(Matcher::PartialJson(json!({"patterns": ["src/*.py"]})))
            .with_status(200)
            .with_body(
                json!({
                    "type": "claim_conflict",
                    "conflicts": [{"agent_id": "worker-2", "patterns": ["src/a.py"]}]
                })
                .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("POST", path)
            .match_body(Matcher::PartialJson(json!({"patterns": ["src/b.py"]})))
            .with_status(409)
            .create_async()
            .await;

        let store = store(&server);
        let claim = |p: &str| vec![p.to_string()];

        let ok = store.claim(&agent(), &claim("tasks/001-a.md"), "r").await;
        assert_eq!(ok.unwrap(), ClaimOutcome::Accepted);

        let conflict = store.claim(&agent(), &claim("src/*.py"), "r").await;
        assert_eq!(
            conflict.unwrap(),
            ClaimOutcome::Rejected {
                conflicts: vec!["src/a.py".to_string()]
            }
        );

        let rejected = store.claim(&agent(), &claim("src/b.py"), "r").await;
        assert!(!rejected.unwrap().is_accepted());
    }

    #[tokio::test]
    async fn status_codes_map_to_error_kinds() {
        let mut server = Server::new_async().await;
        let path = "/stores/acme/repos/todo/branches/main/coordinate/claim";
        server
            .mock("POST", path)
            .with_status(429)
            .with_body(json!({"message": "slow down"}).to_string())
            .create_async()
            .await;
        server
            .mock("DELETE", path)
            .with_status(401)
            .create_async()
            .await;

        let store = store(&server);
        let patterns = vec!["a".to_string()];

        let err = store.claim(&agent(), &patterns, "r").await.unwrap_err();
        assert!(err.is_rate_limited());
        assert!(err.message().contains("slow down"));

        let err = store.release(&agent(), &patterns).await.unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn publish_flattens_the_payload() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/stores/acme/repos/todo/streams/events")
            .match_body(Matcher::Json(json!({
                "type": "agent_join",
                "agent_id": "worker-1",
                "role": "worker"
            })))
            .with_status(200)
            .create_async()
            .await;

        let event = StreamEvent::new(EventKind::AgentJoin, agent()).with("role", "worker");
        store(&server).publish(&event).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn read_events_follows_the_offset_header_and_skips_garbage() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/stores/acme/repos/todo/streams/events")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("limit".into(), "10".into()),
                Matcher::UrlEncoded("offset".into(), "0005".into()),
                Matcher::UrlEncoded("live".into(), "long-poll".into()),
            ]))
            .with_status(200)
            .with_header(NEXT_OFFSET_HEADER, "0007")
            .with_body(
                json!({"events": [
                    {"type": "agent_join", "agent_id": "worker-2", "role": "worker"},
                    {"type": "agent_join"},
                    {"type": "custom", "agent_id": "planner-1", "n": 1}
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let page = store(&server)
            .read_events(
                Some(&StreamOffset::new("0005")),
                10,
                Some(Duration::from_secs(1)),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(page.next_offset, StreamOffset::new("0007"));
        assert_eq!(page.events.len(), 2);
        assert_eq!(page.skipped, 1);
        assert_eq!(page.events[1].kind, EventKind::Other("custom".to_string()));
    }
}
