use serde_json::Value;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// An error reported by the device in an RPC response.
#[derive(Clone, Debug, PartialEq)]
pub struct ReportedError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
    pub received_at: Instant,
    pub freshness_window: Duration,
}

impl ReportedError {
    /// Acute while younger than its freshness window.
    pub fn is_acute_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.received_at) < self.freshness_window
    }

    pub fn is_acute(&self) -> bool {
        self.is_acute_at(Instant::now())
    }
}

/// FIFO of reported errors with lazy eviction of stale entries.
///
/// Nothing expires in the background: stale heads are dropped when the queue
/// is peeked.
#[derive(Debug)]
pub struct ErrorQueue {
    entries: VecDeque<ReportedError>,
    freshness_window: Duration,
    capacity: usize,
}

impl ErrorQueue {
    pub fn new(freshness_window: Duration, capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            freshness_window,
            capacity: capacity.max(1),
        }
    }

    pub fn freshness_window(&self) -> Duration {
        self.freshness_window
    }

    pub fn push(&mut self, code: i64, message: impl Into<String>) {
        self.push_at(code, message, None, Instant::now());
    }

    pub fn push_at(
        &mut self,
        code: i64,
        message: impl Into<String>,
        data: Option<Value>,
        now: Instant,
    ) {
        if self.entries.len() == self.capacity {
            if let Some(dropped) = self.entries.pop_front() {
                warn!(
                    "Error queue full, dropping oldest error {}: {}",
                    dropped.code, dropped.message
                );
            }
        }
        self.entries.push_back(ReportedError {
            code,
            message: message.into(),
            data,
            received_at: now,
            freshness_window: self.freshness_window,
        });
    }

    pub fn peek_fresh(&mut self) -> Option<&ReportedError> {
        self.peek_fresh_at(Instant::now())
    }

    /// First acute error, after dropping every stale one ahead of it.
    pub fn peek_fresh_at(&mut self, now: Instant) -> Option<&ReportedError> {
        while let Some(head) = self.entries.front() {
            if head.is_acute_at(now) {
                break;
            }
            debug!("Error {} went stale: {}", head.code, head.message);
            self.entries.pop_front();
        }
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ErrorQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), 32)
    }
}
