//! Status - タスク集合のステータスと詰まり理由
//!
//! 1 回の snapshot から集計します（store への追加アクセスなし）。

use std::collections::BTreeSet;

use serde::Serialize;

use crate::app::dependency::DependencyGraph;
use crate::app::picker::TaskSnapshot;
use crate::domain::{AgentId, TaskId, TaskStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
}

impl TaskCounts {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveTask {
    pub key: String,
    pub claimed_by: Option<AgentId>,
}

/// A pending task that cannot be picked, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedTask {
    pub key: String,
    /// Dependencies that exist but are not completed yet.
    pub waiting_on: Vec<TaskId>,
    /// Dependencies with no descriptor at all; never satisfied.
    pub unknown: Vec<TaskId>,
    pub on_cycle: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub counts: TaskCounts,
    /// Keys the picker would consider, in pick order.
    pub eligible: Vec<String>,
    pub in_progress: Vec<ActiveTask>,
    /// Pending tasks that still name a claimant; nobody will pick them.
    pub orphaned: Vec<ActiveTask>,
    pub blocked: Vec<BlockedTask>,
    pub cycles: Vec<Vec<TaskId>>,
}

impl StatusReport {
    pub fn from_snapshot(snapshot: &TaskSnapshot) -> Self {
        let graph = DependencyGraph::from_tasks(snapshot.tasks());
        let cycles = graph.cycles();
        let on_cycle: BTreeSet<&TaskId> = cycles.iter().flatten().collect();
        let known: BTreeSet<&TaskId> = snapshot.tasks().iter().map(|t| &t.id).collect();

        let mut report = StatusReport {
            cycles: cycles.clone(),
            ..StatusReport::default()
        };

        for task in snapshot.tasks() {
            match task.status() {
                TaskStatus::Pending => report.counts.pending += 1,
                TaskStatus::InProgress => report.counts.in_progress += 1,
                TaskStatus::Completed => report.counts.completed += 1,
            }

            if task.status() == TaskStatus::InProgress {
                report.in_progress.push(ActiveTask {
                    key: task.key.clone(),
                    claimed_by: task.claimed_by().cloned(),
                });
                continue;
            }
            if task.status() == TaskStatus::Pending && task.claimed_by().is_some() {
                report.orphaned.push(ActiveTask {
                    key: task.key.clone(),
                    claimed_by: task.claimed_by().cloned(),
                });
                continue;
            }
            if !task.is_claimable() {
                continue;
            }
            if snapshot.is_eligible(task) {
                report.eligible.push(task.key.clone());
                continue;
            }

            let (unknown, waiting_on): (Vec<TaskId>, Vec<TaskId>) = task
                .depends_on
                .iter()
                .filter(|dep| !snapshot.dependency_satisfied(dep))
                .cloned()
                .partition(|dep| !known.contains(dep));
            report.blocked.push(BlockedTask {
                key: task.key.clone(),
                waiting_on,
                unknown,
                on_cycle: on_cycle.contains(&task.id),
            });
        }
        report
    }
}
