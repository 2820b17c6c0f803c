//! TaskPicker - 毎ポーリングでタスク全体を走査して次の候補を選ぶ
//!
//! 走査結果は advisory です。複数ワーカーの走査は linearizable ではなく、
//! 最終的な判定は claim（store の調停）が行います。

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::domain::{StoreError, TaskDescriptor, TaskId, TaskStatus, codec};
use crate::ports::{EntryKind, RemoteStore};

/// Decoded descriptors of one scan, in ascending storage-key order.
#[derive(Debug, Clone, Default)]
pub struct TaskSnapshot {
    tasks: Vec<TaskDescriptor>,
}

impl TaskSnapshot {
    pub fn new(mut tasks: Vec<TaskDescriptor>) -> Self {
        tasks.sort_by(|a, b| a.key.cmp(&b.key));
        Self { tasks }
    }

    pub fn tasks(&self) -> &[TaskDescriptor] {
        &self.tasks
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn find(&self, key: &str) -> Option<&TaskDescriptor> {
        self.tasks.iter().find(|t| t.key == key)
    }

    /// Every descriptor carrying `id` (an original and its fixes share one).
    pub fn with_id<'a>(&'a self, id: &'a TaskId) -> impl Iterator<Item = &'a TaskDescriptor> {
        self.tasks.iter().filter(move |t| &t.id == id)
    }

    /// `id` exists and every descriptor with that id is completed.
    pub fn dependency_satisfied(&self, id: &TaskId) -> bool {
        let mut found = false;
        for task in self.with_id(id) {
            if task.status() != TaskStatus::Completed {
                return false;
            }
            found = true;
        }
        found
    }

    /// Pending, unclaimed, and all dependencies completed in this snapshot.
    pub fn is_eligible(&self, task: &TaskDescriptor) -> bool {
        task.is_claimable()
            && task
                .depends_on
                .iter()
                .all(|dep| self.dependency_satisfied(dep))
    }

    pub fn first_eligible(&self) -> Option<&TaskDescriptor> {
        self.tasks.iter().find(|t| self.is_eligible(t))
    }
}

pub struct TaskPicker {
    store: Arc<dyn RemoteStore>,
    tasks_dir: String,
}

impl TaskPicker {
    pub fn new(store: Arc<dyn RemoteStore>, tasks_dir: impl Into<String>) -> Self {
        let tasks_dir = tasks_dir.into().trim_matches('/').to_string();
        Self { store, tasks_dir }
    }

    pub fn tasks_dir(&self) -> &str {
        &self.tasks_dir
    }

    /// Storage keys of every `.md` blob in the tasks directory, sorted.
    async fn descriptor_keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = self.store.list(&self.tasks_dir).await?;
        let mut keys: Vec<String> = entries
            .into_iter()
            .filter(|e| e.kind == EntryKind::Blob && e.name.ends_with(".md"))
            .map(|e| format!("{}/{}", self.tasks_dir, e.name))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn load(&self, keys: Vec<String>) -> Result<TaskSnapshot, StoreError> {
        let mut tasks = Vec::with_capacity(keys.len());
        for key in keys {
            match self.store.read(&key).await? {
                Some(raw) => tasks.push(codec::parse(&key, &raw)),
                // listed then gone; skip
                None => trace!(key, "descriptor vanished during scan"),
            }
        }
        Ok(TaskSnapshot::new(tasks))
    }

    /// Read and decode the whole task set.
    pub async fn snapshot(&self) -> Result<TaskSnapshot, StoreError> {
        let keys = self.descriptor_keys().await?;
        self.load(keys).await
    }

    /// Read only the descriptors whose id is in `ids`.
    pub async fn lookup(&self, ids: &BTreeSet<TaskId>) -> Result<TaskSnapshot, StoreError> {
        let keys = self
            .descriptor_keys()
            .await?
            .into_iter()
            .filter(|key| ids.contains(&TaskId::from_key(key)))
            .collect();
        self.load(keys).await
    }

    /// First eligible descriptor in storage-key order, if any.
    pub async fn pick(&self) -> Result<Option<TaskDescriptor>, StoreError> {
        let snapshot = self.snapshot().await?;
        let picked = snapshot.first_eligible().cloned();
        debug!(
            scanned = snapshot.tasks().len(),
            picked = picked.as_ref().map(|t| t.key.as_str()),
            "scan finished"
        );
        Ok(picked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AgentId;
    use crate::impls::InMemoryStore;

    async fn seed(store: &InMemoryStore, task: &TaskDescriptor) {
        store.seed(task.key.clone(), codec::serialize(task)).await;
    }

    fn completed(key: &str) -> TaskDescriptor {
        TaskDescriptor::new(key, "")
            .start(&AgentId::new("worker-0"))
            .unwrap()
            .complete()
            .unwrap()
    }

    fn picker(store: &Arc<InMemoryStore>) -> TaskPicker {
        TaskPicker::new(store.clone(), "tasks/")
    }

    #[tokio::test]
    async fn picks_first_pending_in_key_order() {
        let store = Arc::new(InMemoryStore::new("main"));
        seed(&store, &TaskDescriptor::new("tasks/002-b.md", "# B")).await;
        seed(&store, &TaskDescriptor::new("tasks/001-a.md", "# A").with_priority(9)).await;
        store.seed("tasks/README.txt", "not a task").await;
        store.seed("tasks/archive/000-old.md", "").await;

        let picked = picker(&store).pick().await.unwrap().unwrap();
        assert_eq!(picked.key, "tasks/001-a.md");
    }

    #[tokio::test]
    async fn skips_tasks_with_unfinished_dependencies() {
        let store = Arc::new(InMemoryStore::new("main"));
        seed(&store, &TaskDescriptor::new("tasks/001-a.md", "")).await;
        seed(
            &store,
            &TaskDescriptor::new("tasks/000-b.md", "").with_dependencies(["001"]),
        )
        .await;

        let picked = picker(&store).pick().await.unwrap().unwrap();
        assert_eq!(picked.key, "tasks/001-a.md");
    }

    #[tokio::test]
    async fn nothing_eligible_yields_none() {
        let store = Arc::new(InMemoryStore::new("main"));
        seed(&store, &completed("tasks/001-a.md")).await;
        seed(
            &store,
            &TaskDescriptor::new("tasks/002-b.md", "").with_dependencies(["009"]),
        )
        .await;
        seed(
            &store,
            &TaskDescriptor::new("tasks/003-c.md", "")
                .start(&AgentId::new("worker-1"))
                .unwrap(),
        )
        .await;

        assert!(picker(&store).pick().await.unwrap().is_none());
        assert!(picker(&store).pick().await.unwrap().is_none());
    }

    #[test]
    fn shared_id_needs_every_descriptor_completed() {
        let snapshot = TaskSnapshot::new(vec![
            completed("tasks/001-a.md"),
            TaskDescriptor::new("tasks/001-fix-1700000000.md", ""),
            TaskDescriptor::new("tasks/002-b.md", "").with_dependencies(["001"]),
        ]);
        assert!(!snapshot.dependency_satisfied(&TaskId::new("001")));
        assert!(!snapshot.dependency_satisfied(&TaskId::new("404")));
        assert_eq!(
            snapshot.first_eligible().map(|t| t.key.as_str()),
            Some("tasks/001-fix-1700000000.md")
        );
    }

    #[tokio::test]
    async fn lookup_reads_only_requested_ids() {
        let store = Arc::new(InMemoryStore::new("main"));
        seed(&store, &completed("tasks/001-a.md")).await;
        seed(&store, &TaskDescriptor::new("tasks/002-b.md", "")).await;

        let ids = BTreeSet::from([TaskId::new("001")]);
        let found = picker(&store).lookup(&ids).await.unwrap();
        assert_eq!(found.tasks().len(), 1);
        assert!(found.dependency_satisfied(&TaskId::new("001")));
    }
}
