//! Command handlers and the shared startup context.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use tracing::debug;

use shuttle_core::config::ShuttleConfig;
use shuttle_core::domain::AgentId;
use shuttle_core::impls::{HttpStore, Retrying};
use shuttle_core::ports::{
    AgentIdGenerator, EventStream, RemoteStore, SystemClock, UlidAgentIds,
};

pub mod coordinate;
pub mod inspect;
pub mod work;

pub use self::coordinate::WaitArgs;
pub use self::inspect::{EventsArgs, TasksArgs};
pub use self::work::WorkArgs;

/// Values from flags / environment that win over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub store: Option<String>,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub agent_id: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut ShuttleConfig) {
        if let Some(base_url) = self.base_url {
            config.store.base_url = base_url;
        }
        if let Some(store) = self.store {
            config.store.store = store;
        }
        if let Some(repo) = self.repo {
            config.store.repo = repo;
        }
        if let Some(branch) = self.branch {
            config.store.branch = branch;
        }
        if self.agent_id.is_some() {
            config.agent_id = self.agent_id;
        }
    }
}

/// Validated configuration plus the HTTP store built from it.
pub struct Context {
    pub config: ShuttleConfig,
    http: Arc<HttpStore>,
}

impl Context {
    pub fn load(path: Option<PathBuf>, mut overrides: Overrides) -> Result<Self> {
        let mut config = match &path {
            Some(path) => ShuttleConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => ShuttleConfig::default(),
        };

        let api_key = overrides.api_key.take().filter(|k| !k.is_empty());
        overrides.apply(&mut config);
        config.validate().context("Invalid configuration")?;

        let Some(api_key) = api_key else {
            bail!("No API key configured; set SCRAPS_API_KEY or pass --api-key");
        };
        let http = HttpStore::from_config(&config.store, api_key)
            .context("Failed to create store client")?;
        debug!(
            base_url = %config.store.base_url,
            store = %config.store.store,
            repo = %config.store.repo,
            branch = %config.store.branch,
            "store configured"
        );

        Ok(Self {
            config,
            http: Arc::new(http),
        })
    }

    /// Store without retries; the worker builder adds its own.
    pub fn raw_store(&self) -> Arc<HttpStore> {
        self.http.clone()
    }

    pub fn store(&self) -> Arc<dyn RemoteStore> {
        Arc::new(Retrying::new(self.http.clone(), self.config.retry.policy()))
    }

    pub fn stream(&self) -> Arc<dyn EventStream> {
        Arc::new(Retrying::new(self.http.clone(), self.config.retry.policy()))
    }

    /// Configured agent id, or a fresh `<role>-<ulid>`.
    pub fn agent(&self, role: &str) -> AgentId {
        match &self.config.agent_id {
            Some(id) => AgentId::new(id.clone()),
            None => UlidAgentIds::new(SystemClock).generate(role),
        }
    }
}
