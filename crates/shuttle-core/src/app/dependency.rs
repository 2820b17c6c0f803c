//! Dependency handling.
//!
//! - `DependencyResolver`: poll the store until prerequisite ids are completed.
//! - `DependencyGraph`: static view over one snapshot, for cycle diagnostics.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::app::picker::TaskPicker;
use crate::domain::{StoreError, TaskDescriptor, TaskId};
use crate::ports::RemoteStore;

/// Result of a dependency wait that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Satisfied,
    TimedOut,
}

pub struct DependencyResolver {
    picker: TaskPicker,
}

impl DependencyResolver {
    pub fn new(store: Arc<dyn RemoteStore>, tasks_dir: impl Into<String>) -> Self {
        Self {
            picker: TaskPicker::new(store, tasks_dir),
        }
    }

    /// Wait until every id in `ids` is completed.
    ///
    /// Each cycle re-reads the store (no caching). An id with no descriptor
    /// is never satisfied. Store failures are returned as `Err`, distinct
    /// from `TimedOut`.
    pub async fn wait_for(
        &self,
        ids: &BTreeSet<TaskId>,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> Result<WaitOutcome, StoreError> {
        if ids.is_empty() {
            return Ok(WaitOutcome::Satisfied);
        }

        let started = Instant::now();
        loop {
            let snapshot = self.picker.lookup(ids).await?;
            let waiting: Vec<&TaskId> = ids
                .iter()
                .filter(|id| !snapshot.dependency_satisfied(id))
                .collect();
            if waiting.is_empty() {
                return Ok(WaitOutcome::Satisfied);
            }

            let elapsed = started.elapsed();
            if elapsed >= max_wait {
                info!(?waiting, waited_ms = elapsed.as_millis() as u64, "dependency wait timed out");
                return Ok(WaitOutcome::TimedOut);
            }
            debug!(?waiting, "waiting for dependencies");
            tokio::time::sleep(poll_interval.min(max_wait - elapsed)).await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// on the current DFS path
    Gray,
    /// fully explored
    Black,
}

/// Dependency graph for one snapshot.
///
/// Design:
/// - Forward edges: task -> tasks it depends on (waits for)
/// - Reverse edges: task -> tasks that depend on it (waiting tasks)
/// - Invariant: edges and reverse_edges must be kept in sync
#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<TaskId, BTreeSet<TaskId>>,
    reverse_edges: BTreeMap<TaskId, BTreeSet<TaskId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a TaskDescriptor>) -> Self {
        let mut graph = Self::new();
        for task in tasks {
            for dep in &task.depends_on {
                graph.add_dependency(task.id.clone(), dep.clone());
            }
        }
        graph
    }

    /// `task` waits for `depends_on`.
    pub fn add_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        self.reverse_edges
            .entry(depends_on.clone())
            .or_default()
            .insert(task.clone());
        self.edges.entry(task).or_default().insert(depends_on);
    }

    pub fn dependencies_of(&self, task: &TaskId) -> Vec<TaskId> {
        self.edges
            .get(task)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Tasks waiting for `task`.
    pub fn dependents_of(&self, task: &TaskId) -> Vec<TaskId> {
        self.reverse_edges
            .get(task)
            .map(|waiting| waiting.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every cycle closed by a back edge of one DFS, as `[a, b, ..., a]`.
    ///
    /// Tasks on a cycle can never become eligible.
    pub fn cycles(&self) -> Vec<Vec<TaskId>> {
        let mut colors = BTreeMap::new();
        let mut path = Vec::new();
        let mut cycles = Vec::new();
        for node in self.edges.keys() {
            if !colors.contains_key(node) {
                self.visit(node, &mut colors, &mut path, &mut cycles);
            }
        }
        cycles
    }

    pub fn detect_cycle(&self) -> Option<Vec<TaskId>> {
        self.cycles().into_iter().next()
    }

    fn visit(
        &self,
        node: &TaskId,
        colors: &mut BTreeMap<TaskId, Color>,
        path: &mut Vec<TaskId>,
        cycles: &mut Vec<Vec<TaskId>>,
    ) {
        colors.insert(node.clone(), Color::Gray);
        path.push(node.clone());

        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                match colors.get(dep) {
                    Some(Color::Gray) => {
                        if let Some(start) = path.iter().position(|n| n == dep) {
                            let mut cycle = path[start..].to_vec();
                            cycle.push(dep.clone());
                            cycles.push(cycle);
                        }
                    }
                    Some(Color::Black) => {}
                    None => self.visit(dep, colors, path, cycles),
                }
            }
        }

        path.pop();
        colors.insert(node.clone(), Color::Black);
    }
}
