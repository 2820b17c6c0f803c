//! Domain identifiers (strongly-typed IDs).
//!
//! TaskId と AgentId はどちらも文字列ですが、型を分けることで混同を防ぎます。
//! - **TaskId**: descriptor の storage key から決定的に導出される（`tasks/001-setup.md` -> `001`）
//! - **AgentId**: claim と commit author に使うワーカー識別子

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a task descriptor, used in `depends_on` references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Derive the id from a storage key.
    ///
    /// The file name's prefix before the first `-` is the id; a file name
    /// without `-` uses its stem.
    ///
    /// ```ignore
    /// assert_eq!(TaskId::from_key("tasks/001-setup.md").as_str(), "001");
    /// assert_eq!(TaskId::from_key("tasks/readme.md").as_str(), "readme");
    /// ```
    pub fn from_key(key: &str) -> Self {
        let file_name = key.rsplit('/').next().unwrap_or(key);
        let id = match file_name.split_once('-') {
            Some((prefix, _)) => prefix,
            None => file_name
                .rsplit_once('.')
                .map(|(stem, _)| stem)
                .unwrap_or(file_name),
        };
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of a worker process (claimant and commit author).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Commit author e-mail used by the store (`<agent>@agent.local`).
    pub fn email(&self) -> String {
        format!("{}@agent.local", self.0)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::numbered("tasks/001-setup.md", "001")]
    #[case::fix_task("tasks/002-fix-1700000000.md", "002")]
    #[case::no_dash("tasks/readme.md", "readme")]
    #[case::no_dir("003-api.md", "003")]
    #[case::no_extension("tasks/notes", "notes")]
    fn task_id_is_derived_from_key(#[case] key: &str, #[case] expected: &str) {
        assert_eq!(TaskId::from_key(key).as_str(), expected);
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = TaskId::new("001");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"001\"");

        let agent: AgentId = serde_json::from_str("\"worker-1\"").unwrap();
        assert_eq!(agent.as_str(), "worker-1");
        assert_eq!(agent.email(), "worker-1@agent.local");
    }

    #[test]
    fn task_ids_sort_lexically() {
        let mut ids = vec![TaskId::new("010"), TaskId::new("002"), TaskId::new("001")];
        ids.sort();
        assert_eq!(ids, vec![TaskId::new("001"), TaskId::new("002"), TaskId::new("010")]);
    }
}
