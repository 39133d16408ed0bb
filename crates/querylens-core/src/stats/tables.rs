//! Per-table aggregates and access-pattern classification.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::Serialize;

use crate::fingerprint::OpKind;
use crate::util::{lock, pct};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPattern {
    ReadHeavy,
    ReadMostly,
    Balanced,
    WriteMostly,
    WriteHeavy,
    Unknown,
}

impl AccessPattern {
    /// Classify from select and write (insert/update/delete) counts.
    pub fn from_counts(selects: u64, writes: u64) -> Self {
        let total = selects + writes;
        if total == 0 {
            return AccessPattern::Unknown;
        }
        let read_ratio = selects as f64 / total as f64;
        if read_ratio > 0.9 {
            AccessPattern::ReadHeavy
        } else if read_ratio < 0.1 {
            AccessPattern::WriteHeavy
        } else if read_ratio > 0.7 {
            AccessPattern::ReadMostly
        } else if read_ratio < 0.3 {
            AccessPattern::WriteMostly
        } else {
            AccessPattern::Balanced
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AccessPattern::ReadHeavy => "read-heavy",
            AccessPattern::ReadMostly => "read-mostly",
            AccessPattern::Balanced => "balanced",
            AccessPattern::WriteMostly => "write-mostly",
            AccessPattern::WriteHeavy => "write-heavy",
            AccessPattern::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct OpBreakdown {
    pub count: u64,
    pub total_ms: f64,
    pub avg_ms: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct TableStats {
    pub table: String,
    pub count: u64,
    pub total_ms: f64,
    pub slow_count: u64,
    pub error_count: u64,
    pub by_op: BTreeMap<OpKind, OpBreakdown>,
    pub access_pattern: AccessPattern,
    #[serde(skip)]
    last_seq: u64,
}

impl TableStats {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            count: 0,
            total_ms: 0.0,
            slow_count: 0,
            error_count: 0,
            by_op: BTreeMap::new(),
            access_pattern: AccessPattern::Unknown,
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

    pub fn slow_pct(&self) -> f64 {
        pct(self.slow_count, self.count)
    }

    pub fn error_rate_pct(&self) -> f64 {
        pct(self.error_count, self.count)
    }

    fn op_count(&self, op: OpKind) -> u64 {
        self.by_op.get(&op).map_or(0, |b| b.count)
    }

    fn recompute_pattern(&mut self) {
        let selects = self.op_count(OpKind::Select);
        let writes = self.op_count(OpKind::Insert)
            + self.op_count(OpKind::Update)
            + self.op_count(OpKind::Delete);
        self.access_pattern = AccessPattern::from_counts(selects, writes);
    }
}

#[derive(Default)]
struct TablesInner {
    tables: HashMap<String, TableStats>,
    /// Monotonic update counter; orders tables by last use.
    seq: u64,
}

pub struct TableTracker {
    inner: Mutex<TablesInner>,
    slow_ms: f64,
    max_tables: usize,
}

impl TableTracker {
    pub fn new(slow_ms: f64, max_tables: usize) -> Self {
        Self {
            inner: Mutex::new(TablesInner::default()),
            slow_ms,
            max_tables: max_tables.max(1),
        }
    }

    pub fn record(&self, table: &str, op: OpKind, duration_ms: f64, failed: bool) {
        let mut inner = lock(&self.inner);
        inner.seq += 1;
        let seq = inner.seq;
        let stats = inner
            .tables
            .entry(table.to_string())
            .or_insert_with(|| TableStats::new(table));
        stats.count += 1;
        stats.total_ms += duration_ms;
        stats.last_seq = seq;
        if duration_ms >= self.slow_ms {
            stats.slow_count += 1;
        }
        if failed {
            stats.error_count += 1;
        }
        let op_stats = stats.by_op.entry(op).or_default();
        op_stats.count += 1;
        op_stats.total_ms += duration_ms;
        op_stats.avg_ms = op_stats.total_ms / op_stats.count as f64;
        stats.recompute_pattern();

        if inner.tables.len() > self.max_tables {
            Self::evict_oldest(&mut inner, self.max_tables);
        }
    }

    /// Drop the least recently used 10% of `max_tables` (at least one).
    fn evict_oldest(inner: &mut TablesInner, max_tables: usize) {
        let batch = (max_tables / 10).max(1).min(inner.tables.len());
        let mut by_age: Vec<(u64, String)> = inner
            .tables
            .values()
            .map(|s| (s.last_seq, s.table.clone()))
            .collect();
        by_age.select_nth_unstable_by_key(batch - 1, |(seq, _)| *seq);
        for (_, table) in by_age.into_iter().take(batch) {
            inner.tables.remove(&table);
        }
        tracing::debug!(
            evicted = batch,
            remaining = inner.tables.len(),
            "table tracker over capacity, evicted least recently used tables"
        );
    }

    pub fn get(&self, table: &str) -> Option<TableStats> {
        lock(&self.inner).tables.get(table).cloned()
    }

    /// All tables, most executed first.
    pub fn snapshot(&self) -> Vec<TableStats> {
        let mut all: Vec<TableStats> = lock(&self.inner).tables.values().cloned().collect();
        all.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.table.cmp(&b.table)));
        all
    }

    /// Slow fraction (percent) per table, for the advisor.
    pub fn slow_pcts(&self) -> HashMap<String, f64> {
        lock(&self.inner)
            .tables
            .iter()
            .map(|(name, s)| (name.clone(), s.slow_pct()))
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.inner).tables.clear();
    }
}
