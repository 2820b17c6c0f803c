//! WorkerBuilder - ワーカーの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - build() 時に設定を検証し、必須コンポーネントの不足を BuildError で返す
//! - store / event stream は RetryPolicy 付きの `Retrying` で包む
//!
//! # 使用例
//! ```ignore
//! let worker = WorkerBuilder::new(config)
//!     .store(store.clone())
//!     .events(store)
//!     .executor(Arc::new(MyExecutor))
//!     .build()?;
//! let report = worker.run(shutdown_rx).await?;
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::app::event_bus::EventBus;
use crate::app::lifecycle::TaskLifecycle;
use crate::app::picker::TaskPicker;
use crate::app::worker_loop::{WorkerLoop, WorkerSettings};
use crate::config::{ConfigError, ShuttleConfig};
use crate::domain::AgentId;
use crate::impls::Retrying;
use crate::ports::{
    AgentIdGenerator, Clock, EventStream, RemoteStore, SystemClock, TaskExecutor, UlidAgentIds,
};

/// BuildError はワーカー構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing component: {0}")]
    Missing(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub struct WorkerBuilder {
    config: ShuttleConfig,
    store: Option<Arc<dyn RemoteStore>>,
    events: Option<Arc<dyn EventStream>>,
    executor: Option<Arc<dyn TaskExecutor>>,
    agent: Option<AgentId>,
    clock: Arc<dyn Clock>,
}

impl WorkerBuilder {
    pub fn new(config: ShuttleConfig) -> Self {
        Self {
            config,
            store: None,
            events: None,
            executor: None,
            agent: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventStream>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Overrides `config.agent_id`.
    pub fn agent(mut self, agent: AgentId) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<WorkerLoop, BuildError> {
        self.config.validate()?;
        let store = self.store.ok_or(BuildError::Missing("store"))?;
        let stream = self.events.ok_or(BuildError::Missing("events"))?;
        let executor = self.executor.ok_or(BuildError::Missing("executor"))?;

        let settings = WorkerSettings::from_config(&self.config);
        let agent = self
            .agent
            .or_else(|| self.config.agent_id.clone().map(AgentId::new))
            .unwrap_or_else(|| UlidAgentIds::new(self.clock.clone()).generate(&settings.role));

        let policy = self.config.retry.policy();
        let store: Arc<dyn RemoteStore> = Arc::new(Retrying::new(store, policy.clone()));
        let stream: Arc<dyn EventStream> = Arc::new(Retrying::new(stream, policy));

        debug!(agent = %agent, tasks_dir = %self.config.tasks_dir, "worker wired");
        let events = EventBus::new(stream, agent);
        let picker = TaskPicker::new(store.clone(), self.config.tasks_dir.clone());
        let lifecycle = TaskLifecycle::new(store, events.clone(), self.config.store.branch.clone());

        Ok(WorkerLoop::new(
            picker,
            lifecycle,
            events,
            executor,
            self.clock,
            settings,
        ))
    }
}
