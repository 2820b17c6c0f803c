//! Configuration - ワーカー設定
//!
//! 設定値は起動時に一度だけ組み立て、各コンポーネントへ明示的に渡します。
//! core のロジックは環境変数を直接読みません（読むのは CLI 側）。
//!
//! ```yaml
//! store:
//!   base_url: https://api.scraps.sh
//!   store: acme
//!   repo: todo-app
//!   branch: main
//! tasks_dir: tasks
//! worker:
//!   poll_interval_secs: 3
//!   max_empty_polls: 10
//! retry:
//!   max_attempts: 5
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration. Every field has a default so a partial YAML file
/// (or none at all) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuttleConfig {
    pub store: StoreConfig,
    /// Generated as `worker-<ulid>` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Directory holding task descriptors.
    pub tasks_dir: String,
    pub worker: WorkerConfig,
    pub dependencies: DependencyConfig,
    pub retry: RetryConfig,
    pub debounce: DebounceConfig,
}

impl Default for ShuttleConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            agent_id: None,
            tasks_dir: "tasks".to_string(),
            worker: WorkerConfig::default(),
            dependencies: DependencyConfig::default(),
            retry: RetryConfig::default(),
            debounce: DebounceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub base_url: String,
    pub store: String,
    pub repo: String,
    pub branch: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.scraps.sh".to_string(),
            store: String::new(),
            repo: String::new(),
            branch: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Pause between polls when nothing is eligible.
    pub poll_interval_secs: f64,
    /// Consecutive empty polls before the worker exits.
    pub max_empty_polls: u32,
    /// Stop after this many completed tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tasks: Option<u32>,
    /// Pause after a lost claim race before reselecting.
    pub claim_retry_delay_secs: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 3.0,
            max_empty_polls: 10,
            max_tasks: None,
            claim_retry_delay_secs: 1.0,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        secs(self.poll_interval_secs)
    }

    pub fn claim_retry_delay(&self) -> Duration {
        secs(self.claim_retry_delay_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyConfig {
    pub poll_interval_secs: f64,
    pub max_wait_secs: f64,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 3.0,
            max_wait_secs: 300.0,
        }
    }
}

impl DependencyConfig {
    pub fn poll_interval(&self) -> Duration {
        secs(self.poll_interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        secs(self.max_wait_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    /// Upper bound of the uniform jitter added to each delay.
    pub jitter_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 2.0,
            jitter_secs: 1.0,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: secs(self.base_delay_secs),
            multiplier: 2.0,
            jitter: secs(self.jitter_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    pub min_interval_secs: f64,
    pub min_chars: usize,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 0.5,
            min_chars: 50,
        }
    }
}

impl DebounceConfig {
    pub fn min_interval(&self) -> Duration {
        secs(self.min_interval_secs)
    }
}

impl ShuttleConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: ShuttleConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Fail fast on values the components cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.store.is_empty() || self.store.repo.is_empty() {
            return Err(ConfigError::Invalid(
                "store.store and store.repo are required".to_string(),
            ));
        }
        if self.store.branch.is_empty() {
            return Err(ConfigError::Invalid("store.branch must not be empty".to_string()));
        }
        if self.tasks_dir.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid("tasks_dir must not be empty".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be >= 1".to_string()));
        }
        if self.worker.max_empty_polls == 0 {
            return Err(ConfigError::Invalid(
                "worker.max_empty_polls must be >= 1".to_string(),
            ));
        }
        let durations = [
            ("worker.poll_interval_secs", self.worker.poll_interval_secs),
            ("worker.claim_retry_delay_secs", self.worker.claim_retry_delay_secs),
            ("dependencies.poll_interval_secs", self.dependencies.poll_interval_secs),
            ("dependencies.max_wait_secs", self.dependencies.max_wait_secs),
            ("retry.base_delay_secs", self.retry.base_delay_secs),
            ("retry.jitter_secs", self.retry.jitter_secs),
            ("debounce.min_interval_secs", self.debounce.min_interval_secs),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
