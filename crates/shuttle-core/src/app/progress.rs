//! ProgressReporter - executor の途中経過を event stream へ流す
//!
//! - `file_chunk` は StreamDebouncer で間引く。抑制した最新の 1 件は保留し、
//!   `flush` またはファイル切り替え時に送る
//! - `file_write` は間引かない

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::app::debounce::StreamDebouncer;
use crate::app::event_bus::EventBus;
use crate::ports::{Clock, ProgressSink};

pub struct ProgressReporter {
    events: EventBus,
    debouncer: StreamDebouncer<Arc<dyn Clock>>,
    current_path: Option<String>,
}

impl ProgressReporter {
    pub fn new(
        events: EventBus,
        clock: Arc<dyn Clock>,
        min_interval: Duration,
        min_chars: usize,
    ) -> Self {
        Self {
            events,
            debouncer: StreamDebouncer::new(clock, min_interval, min_chars),
            current_path: None,
        }
    }

    /// Publish the buffered chunk, if any.
    pub async fn flush(&mut self) {
        if let Some(event) = self.debouncer.take_pending() {
            self.events.publish(event).await;
        }
    }
}

#[async_trait]
impl ProgressSink for ProgressReporter {
    async fn chunk(&mut self, path: &str, content: &str) {
        if self.current_path.as_deref() != Some(path) {
            self.flush().await;
            self.debouncer.reset_length();
            self.current_path = Some(path.to_string());
        }

        let len = content.chars().count();
        if self.debouncer.should_send(len) {
            self.events.file_chunk(path, content).await;
            self.debouncer.mark_sent(len);
            // the buffered chunk is older than what was just sent
            self.debouncer.take_pending();
        } else {
            trace!(path, len, "chunk suppressed");
            self.debouncer
                .set_pending(self.events.file_chunk_event(path, content));
        }
    }

    async fn file_written(&mut self, path: &str, content: &str) {
        match self.debouncer.take_pending() {
            // superseded by the full content
            Some(event) if event.get_str("path") == Some(path) => {}
            Some(event) => self.events.publish(event).await,
            None => {}
        }
        self.events.file_write(path, content).await;
    }
}
