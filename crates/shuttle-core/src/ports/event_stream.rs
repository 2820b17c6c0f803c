//! EventStream port - append-only イベントログ
//!
//! # 保証
//! - offset から再開すれば欠落も重複もない
//! - `wait` を指定すると tail を越えた読み込みは新着まで（最大 wait）待つ

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{EventPage, StoreError, StreamEvent, StreamOffset};

#[async_trait]
pub trait EventStream: Send + Sync {
    async fn publish(&self, event: &StreamEvent) -> Result<(), StoreError>;

    /// Read up to `limit` events starting at `from` (the beginning when `None`).
    ///
    /// With `wait`, an empty read blocks until something is appended or the
    /// wait elapses; the page is then possibly empty.
    async fn read_events(
        &self,
        from: Option<&StreamOffset>,
        limit: usize,
        wait: Option<Duration>,
    ) -> Result<EventPage, StoreError>;
}
