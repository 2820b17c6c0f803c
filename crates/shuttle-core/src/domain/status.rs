//! Task status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task status.
///
/// State transitions:
/// - Pending -> InProgress -> Completed
///
/// No skips, no regressions, no re-entry to Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a worker.
    Pending,

    /// Claimed and being executed by `claimed_by`.
    InProgress,

    /// Done; artifacts committed together with this status.
    Completed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }

    /// Parse the metadata value; unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            _ => None,
        }
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed)
    }

    /// The only legal successor, if any.
    pub fn successor(self) -> Option<Self> {
        match self {
            TaskStatus::Pending => Some(TaskStatus::InProgress),
            TaskStatus::InProgress => Some(TaskStatus::Completed),
            TaskStatus::Completed => None,
        }
    }

    pub fn can_advance_to(self, next: TaskStatus) -> bool {
        self.successor() == Some(next)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const ALL: [TaskStatus; 3] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
    ];

    #[test]
    fn only_forward_single_steps_are_legal() {
        for from in ALL {
            for to in ALL {
                let legal = matches!(
                    (from, to),
                    (TaskStatus::Pending, TaskStatus::InProgress)
                        | (TaskStatus::InProgress, TaskStatus::Completed)
                );
                assert_eq!(from.can_advance_to(to), legal, "{from} -> {to}");
            }
        }
    }

    #[rstest]
    #[case("pending", Some(TaskStatus::Pending))]
    #[case("in_progress", Some(TaskStatus::InProgress))]
    #[case("completed", Some(TaskStatus::Completed))]
    #[case("done", None)]
    #[case("", None)]
    fn parse_metadata_value(#[case] raw: &str, #[case] expected: Option<TaskStatus>) {
        assert_eq!(TaskStatus::parse(raw), expected);
    }

    #[test]
    fn only_completed_is_terminal() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }
}
