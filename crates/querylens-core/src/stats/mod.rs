//! Per-fingerprint rolling statistics.
//!
//! [`StatsTable`] keeps one [`QueryStats`] per fingerprint under a single
//! mutex. When the number of distinct fingerprints exceeds the configured
//! maximum, the oldest 10% (by last execution) are evicted in one batch while
//! the lock that performed the insert is still held, so two concurrent
//! inserts can never evict twice.

pub mod slow_log;
pub mod tables;

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analysis::advisor::Recommendation;
use crate::config::TelemetryConfig;
use crate::fingerprint::{Analyzed, Fingerprint, OpKind};
use crate::util::{lock, pct};

// ============================================================
// Classification
// ============================================================

/// Latency band of a single execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceClass {
    Excellent,
    Good,
    Moderate,
    Slow,
    VerySlow,
}

/// Upper bound of the excellent band.
pub const EXCELLENT_MS: f64 = 50.0;
/// Upper bound of the good band.
pub const GOOD_MS: f64 = 100.0;

/// Classify a duration: excellent (<50) / good (<100) / moderate (<slow) /
/// slow (<very slow) / very slow.
pub fn classify(duration_ms: f64, slow_ms: f64, very_slow_ms: f64) -> PerformanceClass {
    if duration_ms < EXCELLENT_MS {
        PerformanceClass::Excellent
    } else if duration_ms < GOOD_MS {
        PerformanceClass::Good
    } else if duration_ms < slow_ms {
        PerformanceClass::Moderate
    } else if duration_ms < very_slow_ms {
        PerformanceClass::Slow
    } else {
        PerformanceClass::VerySlow
    }
}

/// Result of one execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

// ============================================================
// QueryStats
// ============================================================

#[derive(Clone, Debug, Serialize)]
pub struct QueryStats {
    pub fingerprint: Fingerprint,
    /// Normalized statement text.
    pub pattern: String,
    pub table: String,
    pub op_kind: OpKind,
    pub complexity: u8,
    pub count: u64,
    pub total_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub slow_count: u64,
    pub very_slow_count: u64,
    pub error_count: u64,
    /// Most recent row counts, oldest first.
    pub recent_rows: VecDeque<u64>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub recommendations: Vec<Recommendation>,
    #[serde(skip)]
    last_seq: u64,
}

impl QueryStats {
    fn new(analyzed: &Analyzed, now: DateTime<Utc>) -> Self {
        Self {
            fingerprint: analyzed.fingerprint.clone(),
            pattern: analyzed.normalized.clone(),
            table: analyzed.shape.primary_table().to_string(),
            op_kind: analyzed.shape.op_kind,
            complexity: analyzed.shape.complexity,
            count: 0,
            total_ms: 0.0,
            min_ms: f64::INFINITY,
            max_ms: 0.0,
            slow_count: 0,
            very_slow_count: 0,
            error_count: 0,
            recent_rows: VecDeque::new(),
            first_seen: now,
            last_seen: now,
            recommendations: Vec::new(),
            last_seq: 0,
        }
    }

    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }

    pub fn error_rate_pct(&self) -> f64 {
        pct(self.error_count, self.count)
    }

    /// Slow and very slow executions as a share of all executions.
    pub fn slow_pct(&self) -> f64 {
        pct(self.slow_count + self.very_slow_count, self.count)
    }

    /// Mean of the remembered row counts, `None` if no row counts were reported.
    pub fn avg_rows(&self) -> Option<f64> {
        if self.recent_rows.is_empty() {
            return None;
        }
        let sum: u64 = self.recent_rows.iter().sum();
        Some(sum as f64 / self.recent_rows.len() as f64)
    }
}

/// Totals over every fingerprint currently held.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StatsTotals {
    pub executions: u64,
    pub errors: u64,
    /// Slow plus very slow.
    pub slow: u64,
    pub very_slow: u64,
    pub total_ms: f64,
    pub distinct_queries: usize,
    pub evicted: u64,
}

impl StatsTotals {
    pub fn avg_ms(&self) -> f64 {
        if self.executions == 0 {
            0.0
        } else {
            self.total_ms / self.executions as f64
        }
    }

    pub fn error_rate_pct(&self) -> f64 {
        pct(self.errors, self.executions)
    }

    pub fn slow_pct(&self) -> f64 {
        pct(self.slow, self.executions)
    }
}

// ============================================================
// StatsTable
// ============================================================

struct StatsInner {
    entries: HashMap<Fingerprint, QueryStats>,
    seq: u64,
    evicted: u64,
}

pub struct StatsTable {
    inner: Mutex<StatsInner>,
    slow_ms: f64,
    very_slow_ms: f64,
    max_entries: usize,
    rows_capacity: usize,
}

impl StatsTable {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            inner: Mutex::new(StatsInner {
                entries: HashMap::new(),
                seq: 0,
                evicted: 0,
            }),
            slow_ms: config.slow_threshold_ms,
            very_slow_ms: config.very_slow_threshold_ms,
            max_entries: config.max_fingerprints.max(1),
            rows_capacity: config.recent_rows_capacity.max(1),
        }
    }

    /// Record one execution and return its latency class.
    pub fn record(
        &self,
        analyzed: &Analyzed,
        duration_ms: f64,
        outcome: Outcome,
        rows: Option<u64>,
    ) -> PerformanceClass {
        let class = classify(duration_ms, self.slow_ms, self.very_slow_ms);
        let now = Utc::now();
        let mut inner = lock(&self.inner);
        inner.seq += 1;
        let seq = inner.seq;

        let stats = inner
            .entries
            .entry(analyzed.fingerprint.clone())
            .or_insert_with(|| QueryStats::new(analyzed, now));
        stats.count += 1;
        stats.total_ms += duration_ms;
        stats.min_ms = stats.min_ms.min(duration_ms);
        stats.max_ms = stats.max_ms.max(duration_ms);
        stats.last_seen = now;
        stats.last_seq = seq;
        match class {
            PerformanceClass::Slow => stats.slow_count += 1,
            PerformanceClass::VerySlow => stats.very_slow_count += 1,
            _ => {}
        }
        if outcome == Outcome::Failure {
            stats.error_count += 1;
        }
        if let Some(rows) = rows {
            if stats.recent_rows.len() >= self.rows_capacity {
                stats.recent_rows.pop_front();
            }
            stats.recent_rows.push_back(rows);
        }

        if inner.entries.len() > self.max_entries {
            Self::evict_oldest(&mut inner, self.max_entries);
        }

        class
    }

    /// Drop the oldest 10% of `max_entries` (at least one) by last execution.
    fn evict_oldest(inner: &mut StatsInner, max_entries: usize) {
        let batch = (max_entries / 10).max(1).min(inner.entries.len());
        let mut by_age: Vec<(u64, Fingerprint)> = inner
            .entries
            .values()
            .map(|s| (s.last_seq, s.fingerprint.clone()))
            .collect();
        by_age.select_nth_unstable_by_key(batch - 1, |(seq, _)| *seq);
        for (_, fp) in by_age.into_iter().take(batch) {
            inner.entries.remove(&fp);
        }
        inner.evicted += batch as u64;
        tracing::debug!(
            evicted = batch,
            remaining = inner.entries.len(),
            "query stats table over capacity, evicted oldest fingerprints"
        );
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<QueryStats> {
        lock(&self.inner).entries.get(fingerprint).cloned()
    }

    /// Copy of every entry, in no particular order.
    pub fn snapshot(&self) -> Vec<QueryStats> {
        lock(&self.inner).entries.values().cloned().collect()
    }

    /// The `n` fingerprints with the highest average duration.
    pub fn top_slow(&self, n: usize) -> Vec<QueryStats> {
        let mut all = self.snapshot();
        all.sort_by(|a, b| b.avg_ms().total_cmp(&a.avg_ms()));
        all.truncate(n);
        all
    }

    pub fn totals(&self) -> StatsTotals {
        let inner = lock(&self.inner);
        let mut t = StatsTotals {
            distinct_queries: inner.entries.len(),
            evicted: inner.evicted,
            ..StatsTotals::default()
        };
        for s in inner.entries.values() {
            t.executions += s.count;
            t.errors += s.error_count;
            t.slow += s.slow_count + s.very_slow_count;
            t.very_slow += s.very_slow_count;
            t.total_ms += s.total_ms;
        }
        t
    }

    /// Replace every entry's recommendation set. Entries missing from `recs`
    /// end up with an empty set.
    pub(crate) fn apply_recommendations(
        &self,
        mut recs: HashMap<Fingerprint, Vec<Recommendation>>,
    ) {
        let mut inner = lock(&self.inner);
        for (fp, stats) in inner.entries.iter_mut() {
            stats.recommendations = recs.remove(fp).unwrap_or_default();
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        inner.entries.clear();
        inner.entries.shrink_to_fit();
    }
}
