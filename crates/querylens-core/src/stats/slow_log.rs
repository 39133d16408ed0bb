//! Bounded FIFO of slow executions.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::fingerprint::Fingerprint;
use crate::util::lock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlowSeverity {
    Slow,
    VerySlow,
}

#[derive(Clone, Debug, Serialize)]
pub struct SlowQueryEvent {
    pub fingerprint: Fingerprint,
    /// Single-line, truncated statement text.
    pub sql: String,
    /// First few bound parameters, rendered as text.
    pub params: Vec<String>,
    pub duration_ms: f64,
    pub table: String,
    pub severity: SlowSeverity,
    pub timestamp: DateTime<Utc>,
}

/// Fixed-capacity log; pushing into a full log drops the oldest event.
pub struct SlowQueryLog {
    events: Mutex<VecDeque<SlowQueryEvent>>,
    capacity: usize,
}

impl SlowQueryLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, event: SlowQueryEvent) {
        let mut events = lock(&self.events);
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Up to `n` most recent events, newest first.
    pub fn recent(&self, n: usize) -> Vec<SlowQueryEvent> {
        lock(&self.events).iter().rev().take(n).cloned().collect()
    }

    /// Number of very slow events currently retained.
    pub fn very_slow_len(&self) -> usize {
        lock(&self.events)
            .iter()
            .filter(|e| e.severity == SlowSeverity::VerySlow)
            .count()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}
