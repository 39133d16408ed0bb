//! Bounded per-metric time series with direction and spike detection.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::AnomalyConfig;
use crate::util::lock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendMetric {
    ResponseTime,
    ErrorRate,
    QueryTime,
    ResourceUsage,
}

impl TrendMetric {
    pub fn label(self) -> &'static str {
        match self {
            TrendMetric::ResponseTime => "response_time",
            TrendMetric::ErrorRate => "error_rate",
            TrendMetric::QueryTime => "query_time",
            TrendMetric::ResourceUsage => "resource_usage",
        }
    }

    /// Absolute floor a spike must also exceed.
    fn spike_floor(self, cfg: &AnomalyConfig) -> f64 {
        match self {
            TrendMetric::ResponseTime | TrendMetric::QueryTime => cfg.latency_floor_ms,
            TrendMetric::ErrorRate => cfg.error_rate_floor_pct,
            TrendMetric::ResourceUsage => cfg.memory_floor_mb,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Flat,
}

/// Direction over the last `window` points: non-flat when at least
/// `agreement` of the consecutive deltas share a sign.
pub fn direction(values: &[f64], window: usize, agreement: f64) -> TrendDirection {
    let start = values.len().saturating_sub(window);
    let tail = &values[start..];
    if tail.len() < 2 {
        return TrendDirection::Flat;
    }
    let deltas = (tail.len() - 1) as f64;
    let (mut up, mut down) = (0usize, 0usize);
    for pair in tail.windows(2) {
        if pair[1] > pair[0] {
            up += 1;
        } else if pair[1] < pair[0] {
            down += 1;
        }
    }
    if up as f64 / deltas >= agreement {
        TrendDirection::Increasing
    } else if down as f64 / deltas >= agreement {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Flat
    }
}

/// Mean of up to `window` points preceding the latest one when the latest
/// is both above `factor` times that mean and above `floor`.
pub fn spike(values: &[f64], window: usize, factor: f64, floor: f64) -> Option<f64> {
    let (&latest, rest) = values.split_last()?;
    if rest.is_empty() {
        return None;
    }
    let start = rest.len().saturating_sub(window);
    let baseline = &rest[start..];
    let mean = baseline.iter().sum::<f64>() / baseline.len() as f64;
    (latest > mean * factor && latest > floor).then_some(mean)
}

#[derive(Clone, Debug, Serialize)]
pub struct Insight {
    pub metric: TrendMetric,
    pub direction: TrendDirection,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct Anomaly {
    pub metric: TrendMetric,
    pub value: f64,
    pub baseline: f64,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

// ============================================================
// TrendStore
// ============================================================

pub struct TrendStore {
    series: Mutex<BTreeMap<TrendMetric, VecDeque<TrendPoint>>>,
    capacity: usize,
}

impl TrendStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            series: Mutex::new(BTreeMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn update(&self, metric: TrendMetric, point: TrendPoint) {
        let mut series = lock(&self.series);
        let ring = series.entry(metric).or_default();
        if ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(point);
    }

    pub fn series(&self, metric: TrendMetric) -> Vec<TrendPoint> {
        lock(&self.series)
            .get(&metric)
            .map(|r| r.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> BTreeMap<TrendMetric, Vec<TrendPoint>> {
        lock(&self.series)
            .iter()
            .map(|(m, r)| (*m, r.iter().copied().collect()))
            .collect()
    }

    /// Drop points older than `cutoff`. Returns the number removed.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut series = lock(&self.series);
        let mut removed = 0;
        for ring in series.values_mut() {
            while ring.front().is_some_and(|p| p.timestamp < cutoff) {
                ring.pop_front();
                removed += 1;
            }
        }
        removed
    }

    /// Direction insights (non-flat only) and spike anomalies for every metric.
    pub fn analyze(&self, cfg: &AnomalyConfig) -> (Vec<Insight>, Vec<Anomaly>) {
        let series = lock(&self.series);
        let mut insights = Vec::new();
        let mut anomalies = Vec::new();

        for (metric, ring) in series.iter() {
            let values: Vec<f64> = ring.iter().map(|p| p.value).collect();

            let dir = direction(&values, cfg.trend_window, cfg.trend_agreement);
            if dir != TrendDirection::Flat {
                let word = match dir {
                    TrendDirection::Increasing => "increasing",
                    _ => "decreasing",
                };
                insights.push(Insight {
                    metric: *metric,
                    direction: dir,
                    message: format!(
                        "{} is {word} over the last {} samples",
                        metric.label(),
                        values.len().min(cfg.trend_window)
                    ),
                });
            }

            let floor = metric.spike_floor(cfg);
            if let Some(baseline) = spike(&values, cfg.spike_window, cfg.spike_factor, floor)
                && let Some(last) = ring.back()
            {
                anomalies.push(Anomaly {
                    metric: *metric,
                    value: last.value,
                    baseline,
                    timestamp: last.timestamp,
                    message: format!(
                        "{} spiked to {:.1} (baseline {:.1})",
                        metric.label(),
                        last.value,
                        baseline
                    ),
                });
            }
        }

        (insights, anomalies)
    }
}
