//! Ingestion facade for the data-access layer.
//!
//! Every executed statement is reported through
//! [`QueryTelemetry::record_query_execution`], which fingerprints it and
//! updates the per-query table, the per-table tracker and, when slow, the
//! slow query log. Recording never fails and never panics.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, warn};

use crate::analysis::advisor::per_query_recommendations;
use crate::collector::QueryMetrics;
use crate::config::{AdvisorThresholds, QueryLensConfig, TelemetryConfig};
use crate::fingerprint::{Fingerprint, analyze};
use crate::fmt::{normalize_for_display, truncate};
use crate::stats::slow_log::{SlowQueryEvent, SlowQueryLog, SlowSeverity};
use crate::stats::tables::{TableStats, TableTracker};
use crate::stats::{Outcome, PerformanceClass, QueryStats, StatsTable, StatsTotals};

/// Top-N used when the telemetry collector reports slow queries.
pub const DEFAULT_TOP_N: usize = 10;

const PARAM_MAX_LEN: usize = 100;

/// Row metadata of a successful execution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResultMeta {
    pub row_count: u64,
}

/// One executed statement as reported by the host.
#[derive(Clone, Copy, Debug)]
pub struct QueryExecution<'a> {
    pub sql: &'a str,
    pub duration_ms: f64,
    pub params: &'a [serde_json::Value],
    pub result: Option<ResultMeta>,
    pub error: Option<&'a str>,
}

impl<'a> QueryExecution<'a> {
    pub fn new(sql: &'a str, duration_ms: f64) -> Self {
        Self {
            sql,
            duration_ms,
            params: &[],
            result: None,
            error: None,
        }
    }

    pub fn params(mut self, params: &'a [serde_json::Value]) -> Self {
        self.params = params;
        self
    }

    pub fn rows(mut self, row_count: u64) -> Self {
        self.result = Some(ResultMeta { row_count });
        self
    }

    pub fn error(mut self, error: &'a str) -> Self {
        self.error = Some(error);
        self
    }
}

pub struct QueryTelemetry {
    config: TelemetryConfig,
    advisor: AdvisorThresholds,
    stats: StatsTable,
    slow_log: SlowQueryLog,
    tables: TableTracker,
}

impl QueryTelemetry {
    pub fn new(config: &QueryLensConfig) -> Self {
        Self::with_config(config.telemetry.clone(), config.advisor.clone())
    }

    pub fn with_config(config: TelemetryConfig, advisor: AdvisorThresholds) -> Self {
        Self {
            stats: StatsTable::new(&config),
            slow_log: SlowQueryLog::new(config.slow_log_capacity),
            tables: TableTracker::new(config.slow_threshold_ms, config.max_tables),
            config,
            advisor,
        }
    }

    /// Record one execution and return its latency class.
    pub fn record_query_execution(&self, exec: QueryExecution<'_>) -> PerformanceClass {
        let duration_ms = if exec.duration_ms.is_finite() {
            exec.duration_ms.max(0.0)
        } else {
            0.0
        };
        let outcome = if exec.error.is_some() {
            Outcome::Failure
        } else {
            Outcome::Success
        };
        let rows = exec.result.map(|r| r.row_count);

        let analyzed = analyze(exec.sql);
        let table = analyzed.shape.primary_table();
        let class = self.stats.record(&analyzed, duration_ms, outcome, rows);
        self.tables.record(
            table,
            analyzed.shape.op_kind,
            duration_ms,
            outcome == Outcome::Failure,
        );

        if let Some(err) = exec.error {
            debug!(fingerprint = %analyzed.fingerprint, table, error = err, "query failed");
        }

        let severity = match class {
            PerformanceClass::Slow => SlowSeverity::Slow,
            PerformanceClass::VerySlow => SlowSeverity::VerySlow,
            _ => return class,
        };

        let sql = truncate(
            &normalize_for_display(exec.sql),
            self.config.display_sql_max_len,
        );
        if severity == SlowSeverity::VerySlow {
            warn!(
                fingerprint = %analyzed.fingerprint,
                table,
                duration_ms,
                sql = %sql,
                "very slow query"
            );
        } else {
            debug!(fingerprint = %analyzed.fingerprint, table, duration_ms, "slow query");
        }

        self.slow_log.push(SlowQueryEvent {
            fingerprint: analyzed.fingerprint.clone(),
            sql,
            params: exec
                .params
                .iter()
                .take(self.config.params_sample_len)
                .map(render_param)
                .collect(),
            duration_ms,
            table: table.to_string(),
            severity,
            timestamp: Utc::now(),
        });

        class
    }

    // ============================================================
    // Read API
    // ============================================================

    pub fn top_slow_queries(&self, n: usize) -> Vec<QueryStats> {
        self.stats.top_slow(n)
    }

    /// Per-table stats, most executed first.
    pub fn table_performance(&self) -> Vec<TableStats> {
        self.tables.snapshot()
    }

    pub fn recent_slow_events(&self, n: usize) -> Vec<SlowQueryEvent> {
        self.slow_log.recent(n)
    }

    pub fn query_stats(&self, fingerprint: &Fingerprint) -> Option<QueryStats> {
        self.stats.get(fingerprint)
    }

    pub fn all_query_stats(&self) -> Vec<QueryStats> {
        self.stats.snapshot()
    }

    pub fn totals(&self) -> StatsTotals {
        self.stats.totals()
    }

    /// Rebuild every query's recommendation set from current stats.
    pub fn refresh_recommendations(&self) {
        let snapshot = self.stats.snapshot();
        let table_slow: HashMap<String, f64> = self.tables.slow_pcts();
        let recs = per_query_recommendations(
            &snapshot,
            &table_slow,
            self.config.slow_threshold_ms,
            &self.advisor,
        );
        let flagged = recs.values().filter(|r| !r.is_empty()).count();
        self.stats.apply_recommendations(recs);
        debug!(queries = snapshot.len(), flagged, "query recommendations refreshed");
    }

    /// Payload reported by the telemetry collector.
    pub fn query_metrics(&self, top_n: usize) -> QueryMetrics {
        QueryMetrics {
            totals: self.stats.totals(),
            top_slow: self.stats.top_slow(top_n),
            tables: self.tables.snapshot(),
            recent_slow: self.slow_log.recent(top_n),
            slow_log_len: self.slow_log.len(),
        }
    }

    pub fn slow_threshold_ms(&self) -> f64 {
        self.config.slow_threshold_ms
    }

    pub fn clear(&self) {
        self.stats.clear();
        self.slow_log.clear();
        self.tables.clear();
    }
}

fn render_param(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => truncate(s, PARAM_MAX_LEN),
        other => truncate(&other.to_string(), PARAM_MAX_LEN),
    }
}
