//! Connection pool sampling.
//!
//! The host application exposes its pool through [`PoolSource`]; the
//! [`PoolMonitor`] samples it on a fixed interval into a bounded history and
//! raises alerts when clients are waiting for a connection or the pool is
//! close to saturation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::analysis::{Alert, AlertKind, Severity};
use crate::collector::CollectError;
use crate::config::PoolConfig;
use crate::util::lock;

/// Point-in-time pool counters as reported by the host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub active: u32,
    pub idle: u32,
    pub waiting: u32,
    pub max: u32,
}

pub trait PoolSource: Send + Sync {
    fn status(&self) -> Result<PoolStatus, CollectError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PoolSample {
    pub active: u32,
    pub idle: u32,
    pub waiting: u32,
    pub max: u32,
    pub timestamp: DateTime<Utc>,
}

impl PoolSample {
    pub fn from_status(status: PoolStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            active: status.active,
            idle: status.idle,
            waiting: status.waiting,
            max: status.max,
            timestamp,
        }
    }

    /// Active connections as a percentage of max; 0 when max is 0.
    pub fn utilization_pct(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            self.active as f64 / self.max as f64 * 100.0
        }
    }
}

/// Alerts for one sample: waiting clients (warning), active above
/// `saturation_ratio` of max (critical).
pub fn sample_alerts(sample: &PoolSample, saturation_ratio: f64, now: DateTime<Utc>) -> Vec<Alert> {
    let mut alerts = Vec::new();
    if sample.waiting > 0 {
        alerts.push(Alert {
            kind: AlertKind::PoolWaiting,
            severity: Severity::Warning,
            message: format!("{} client(s) waiting for a pool connection", sample.waiting),
            value: sample.waiting as f64,
            threshold: 0.0,
            timestamp: now,
        });
    }
    let limit = saturation_ratio * sample.max as f64;
    if sample.max > 0 && sample.active as f64 > limit {
        alerts.push(Alert {
            kind: AlertKind::PoolSaturation,
            severity: Severity::Critical,
            message: format!(
                "Pool near saturation: {} of {} connections active",
                sample.active, sample.max
            ),
            value: sample.utilization_pct(),
            threshold: saturation_ratio * 100.0,
            timestamp: now,
        });
    }
    alerts
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct PoolMetrics {
    pub latest: Option<PoolSample>,
    pub utilization_pct: f64,
    pub avg_active: f64,
    pub peak_waiting: u32,
    pub samples: usize,
}

// ============================================================
// PoolMonitor
// ============================================================

pub struct PoolMonitor {
    source: Arc<dyn PoolSource>,
    history: Mutex<VecDeque<PoolSample>>,
    config: PoolConfig,
}

impl PoolMonitor {
    pub fn new(source: Arc<dyn PoolSource>, config: PoolConfig) -> Self {
        Self {
            source,
            history: Mutex::new(VecDeque::with_capacity(config.history_len)),
            config,
        }
    }

    /// Take one sample and append it to the history.
    pub fn sample_now(&self) -> Result<PoolSample, CollectError> {
        let now = Utc::now();
        let sample = PoolSample::from_status(self.source.status()?, now);
        {
            let mut history = lock(&self.history);
            while history.len() >= self.config.history_len.max(1) {
                history.pop_front();
            }
            history.push_back(sample);
        }
        for alert in sample_alerts(&sample, self.config.saturation_ratio, now) {
            warn!(
                kind = ?alert.kind,
                active = sample.active,
                waiting = sample.waiting,
                max = sample.max,
                "{}",
                alert.message
            );
        }
        Ok(sample)
    }

    pub fn latest(&self) -> Option<PoolSample> {
        lock(&self.history).back().copied()
    }

    /// Samples oldest first.
    pub fn history(&self) -> Vec<PoolSample> {
        lock(&self.history).iter().copied().collect()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.latest()
            .map(|s| sample_alerts(&s, self.config.saturation_ratio, Utc::now()))
            .unwrap_or_default()
    }

    pub fn metrics(&self) -> PoolMetrics {
        let history = lock(&self.history);
        let latest = history.back().copied();
        let samples = history.len();
        let avg_active = if samples == 0 {
            0.0
        } else {
            history.iter().map(|s| s.active as f64).sum::<f64>() / samples as f64
        };
        PoolMetrics {
            utilization_pct: latest.map_or(0.0, |s| s.utilization_pct()),
            latest,
            avg_active,
            peak_waiting: history.iter().map(|s| s.waiting).max().unwrap_or(0),
            samples,
        }
    }

    pub fn saturation_ratio(&self) -> f64 {
        self.config.saturation_ratio
    }

    /// Start the periodic sampler on the current runtime.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.sample_loop().await })
    }

    async fn sample_loop(&self) {
        let interval = self.config.sample_interval();
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            match self.sample_now() {
                Ok(s) => debug!(
                    active = s.active,
                    idle = s.idle,
                    waiting = s.waiting,
                    "pool sampled"
                ),
                Err(e) => warn!(error = %e, "pool sample failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FixedPool(Mutex<PoolStatus>);

    impl PoolSource for FixedPool {
        fn status(&self) -> Result<PoolStatus, CollectError> {
            Ok(*self.0.lock().unwrap())
        }
    }

    fn monitor(status: PoolStatus, history_len: usize) -> PoolMonitor {
        PoolMonitor::new(
            Arc::new(FixedPool(Mutex::new(status))),
            PoolConfig {
                history_len,
                ..PoolConfig::default()
            },
        )
    }

    #[test]
    fn test_utilization() {
        let s = PoolSample::from_status(
            PoolStatus {
                active: 5,
                idle: 5,
                waiting: 0,
                max: 20,
            },
            Utc::now(),
        );
        assert_eq!(s.utilization_pct(), 25.0);
        let empty = PoolSample::from_status(PoolStatus::default(), Utc::now());
        assert_eq!(empty.utilization_pct(), 0.0);
    }

    #[test]
    fn test_alerts() {
        let now = Utc::now();
        let quiet = PoolSample::from_status(
            PoolStatus {
                active: 9,
                idle: 1,
                waiting: 0,
                max: 10,
            },
            now,
        );
        // 9 is not above 0.9 * 10.
        assert!(sample_alerts(&quiet, 0.9, now).is_empty());

        let busy = PoolSample::from_status(
            PoolStatus {
                active: 10,
                idle: 0,
                waiting: 3,
                max: 10,
            },
            now,
        );
        let alerts = sample_alerts(&busy, 0.9, now);
        let kinds: Vec<_> = alerts.iter().map(|a| (a.kind, a.severity)).collect();
        assert_eq!(
            kinds,
            vec![
                (AlertKind::PoolWaiting, Severity::Warning),
                (AlertKind::PoolSaturation, Severity::Critical),
            ]
        );
    }

    #[test]
    fn test_history_bounded() {
        let m = monitor(
            PoolStatus {
                active: 1,
                idle: 1,
                waiting: 0,
                max: 4,
            },
            3,
        );
        for _ in 0..5 {
            m.sample_now().unwrap();
        }
        assert_eq!(m.history().len(), 3);
        let metrics = m.metrics();
        assert_eq!(metrics.samples, 3);
        assert_eq!(metrics.utilization_pct, 25.0);
        assert_eq!(metrics.avg_active, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_loop_ticks() {
        let m = Arc::new(monitor(
            PoolStatus {
                active: 2,
                idle: 3,
                waiting: 1,
                max: 10,
            },
            100,
        ));
        let handle = m.clone().spawn();
        // Ticks at 0s, 10s and 20s.
        tokio::time::sleep(Duration::from_secs(25)).await;
        handle.abort();
        assert_eq!(m.history().len(), 3);
        assert_eq!(m.metrics().peak_waiting, 1);
        assert_eq!(m.alerts().len(), 1);
    }
}
