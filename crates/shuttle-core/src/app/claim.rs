//! ClaimArbiter - パターン集合の排他 claim / release
//!
//! 調停は store が行い、ここはロック状態を持ちません。
//! store の拒否はそれ自体 all-or-nothing なので、Rejected では何も release しません
//! （以前から保持していたパターンを手放さないため）。
//! 結果の分からない失敗（transport など）のときだけ集合を release します。

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::app::event_bus::EventBus;
use crate::domain::{AgentId, StoreError};
use crate::ports::{ClaimOutcome, RemoteStore};

pub struct ClaimArbiter {
    store: Arc<dyn RemoteStore>,
    events: EventBus,
}

impl ClaimArbiter {
    pub fn new(store: Arc<dyn RemoteStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    pub fn agent(&self) -> &AgentId {
        self.events.agent()
    }

    /// Try to hold every pattern. `false` on conflict or store failure.
    pub async fn claim(&self, patterns: &[String], reason: &str) -> bool {
        let agent = self.agent();
        match self.store.claim(agent, patterns, reason).await {
            Ok(ClaimOutcome::Accepted) => {
                info!(agent = %agent, ?patterns, "claimed");
                self.events.claimed(patterns, reason).await;
                true
            }
            Ok(ClaimOutcome::Rejected { conflicts }) => {
                info!(agent = %agent, ?patterns, ?conflicts, "claim rejected");
                false
            }
            Err(e) => {
                warn!(agent = %agent, ?patterns, error = %e, "claim failed");
                self.compensate(patterns).await;
                false
            }
        }
    }

    /// Release every pattern. Releasing what is not held succeeds.
    pub async fn release(&self, patterns: &[String]) -> Result<(), StoreError> {
        self.store.release(self.agent(), patterns).await?;
        debug!(agent = %self.agent(), ?patterns, "released");
        self.events.released(patterns).await;
        Ok(())
    }

    async fn compensate(&self, patterns: &[String]) {
        if let Err(e) = self.store.release(self.agent(), patterns).await {
            debug!(error = %e, "compensating release failed");
        }
    }
}
