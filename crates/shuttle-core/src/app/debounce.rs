//! StreamDebouncer - 途中経過イベントの送信間引き
//!
//! 時刻と長さだけで判定する純粋なロジック。ネットワークには触れません。

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::StreamEvent;
use crate::ports::Clock;

pub struct StreamDebouncer<C> {
    clock: C,
    min_interval: Duration,
    min_chars: usize,
    last_sent_at: Option<DateTime<Utc>>,
    last_sent_len: usize,
    pending: Option<StreamEvent>,
}

impl<C: Clock> StreamDebouncer<C> {
    pub fn new(clock: C, min_interval: Duration, min_chars: usize) -> Self {
        Self {
            clock,
            min_interval,
            min_chars,
            last_sent_at: None,
            last_sent_len: 0,
            pending: None,
        }
    }

    /// True iff `min_interval` has elapsed or `min_chars` were added since
    /// the last `mark_sent`. Nothing sent yet counts as elapsed.
    pub fn should_send(&self, content_len: usize) -> bool {
        let elapsed_enough = match self.last_sent_at {
            None => true,
            Some(at) => (self.clock.now() - at)
                .to_std()
                .map(|elapsed| elapsed >= self.min_interval)
                // clock went backwards
                .unwrap_or(false),
        };
        let chars_added = content_len.saturating_sub(self.last_sent_len);
        elapsed_enough || chars_added >= self.min_chars
    }

    pub fn mark_sent(&mut self, content_len: usize) {
        self.last_sent_at = Some(self.clock.now());
        self.last_sent_len = content_len;
    }

    /// Restart length tracking, e.g. when content for a new file begins.
    pub fn reset_length(&mut self) {
        self.last_sent_len = 0;
    }

    /// Buffer the latest suppressed event, replacing any earlier one.
    pub fn set_pending(&mut self, event: StreamEvent) {
        self.pending = Some(event);
    }

    pub fn take_pending(&mut self) -> Option<StreamEvent> {
        self.pending.take()
    }
}
