//! Request counters fed by the host HTTP layer.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::util::pct;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct RequestMetrics {
    pub requests: u64,
    pub errors: u64,
    pub avg_response_ms: f64,
    pub error_rate_pct: f64,
}

/// Lock-free request counters. Share it behind an `Arc` with the HTTP layer.
#[derive(Debug, Default)]
pub struct RequestMetricsRecorder {
    requests: AtomicU64,
    errors: AtomicU64,
    total_us: AtomicU64,
}

impl RequestMetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, duration_ms: f64, failed: bool) {
        let us = (duration_ms.max(0.0) * 1000.0) as u64;
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(us, Ordering::Relaxed);
        if failed {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> RequestMetrics {
        let requests = self.requests.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let total_us = self.total_us.load(Ordering::Relaxed);
        RequestMetrics {
            requests,
            errors,
            avg_response_ms: if requests == 0 {
                0.0
            } else {
                total_us as f64 / 1000.0 / requests as f64
            },
            error_rate_pct: pct(errors, requests),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let m = RequestMetricsRecorder::new().snapshot();
        assert_eq!(m, RequestMetrics::default());
    }

    #[test]
    fn test_record() {
        let r = RequestMetricsRecorder::new();
        r.record(100.0, false);
        r.record(300.0, true);
        r.record(200.0, false);
        r.record(400.0, false);
        let m = r.snapshot();
        assert_eq!(m.requests, 4);
        assert_eq!(m.errors, 1);
        assert_eq!(m.avg_response_ms, 250.0);
        assert_eq!(m.error_rate_pct, 25.0);
    }
}
