//! Aggregated snapshot types: one complete point-in-time view, published
//! atomically once per collection cycle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analysis::advisor::Recommendation;
use crate::analysis::trends::{Anomaly, Insight, TrendMetric, TrendPoint};
use crate::analysis::{Alert, HealthReport};
use crate::cache::CacheStats;
use crate::collector::{
    CollectorPayload, ProcessMetrics, QueryMetrics, RequestMetrics, find_payload,
};
use crate::pool::PoolMetrics;

/// Top-level snapshot handed to readers.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AggregatedSnapshot {
    /// Absent until the first cycle completes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    pub cycle: u64,
    pub summary: MetricsSummary,
    pub performance: PerformanceBreakdown,
    pub trends: BTreeMap<TrendMetric, Vec<TrendPoint>>,
    pub alerts: Vec<Alert>,
    pub recommendations: Vec<Recommendation>,
    pub insights: Vec<Insight>,
    pub anomalies: Vec<Anomaly>,
    pub collectors: Vec<CollectorStatus>,
}

// ============================================================
// Summary
// ============================================================

#[derive(Clone, Debug, Default, Serialize)]
pub struct MetricsSummary {
    pub total_queries: u64,
    /// Present when a request metrics collector is registered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_requests: Option<u64>,
    pub error_rate_pct: f64,
    pub avg_response_ms: f64,
    pub avg_query_ms: f64,
    pub slow_query_pct: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit_rate_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_utilization_pct: Option<f64>,
    pub health: HealthReport,
}

/// Latest payload of each builtin kind.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PerformanceBreakdown {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queries: Option<QueryMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests: Option<RequestMetrics>,
    /// Custom payloads keyed by collector name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, serde_json::Value>,
}

impl PerformanceBreakdown {
    pub fn from_payloads<'a>(payloads: &[(&'a str, &'a CollectorPayload)]) -> Self {
        let all = || payloads.iter().map(|(_, p)| *p);
        Self {
            queries: find_payload(all(), |p| match p {
                CollectorPayload::Queries(m) => Some(m.clone()),
                _ => None,
            }),
            pool: find_payload(all(), |p| match p {
                CollectorPayload::Pool(m) => Some(m.clone()),
                _ => None,
            }),
            cache: find_payload(all(), |p| match p {
                CollectorPayload::Cache(m) => Some(m.clone()),
                _ => None,
            }),
            process: find_payload(all(), |p| match p {
                CollectorPayload::Process(m) => Some(*m),
                _ => None,
            }),
            requests: find_payload(all(), |p| match p {
                CollectorPayload::Requests(m) => Some(*m),
                _ => None,
            }),
            custom: payloads
                .iter()
                .filter_map(|(name, p)| match p {
                    CollectorPayload::Custom(v) => Some((name.to_string(), v.clone())),
                    _ => None,
                })
                .collect(),
        }
    }
}

impl MetricsSummary {
    /// Derive the summary from the latest payloads. Request metrics, when
    /// present and non-empty, drive error rate and response time; otherwise
    /// query metrics do. Health is filled in by the caller.
    pub fn from_breakdown(perf: &PerformanceBreakdown) -> Self {
        let mut s = MetricsSummary::default();

        if let Some(q) = &perf.queries {
            s.total_queries = q.totals.executions;
            s.avg_query_ms = q.totals.avg_ms();
            s.slow_query_pct = q.totals.slow_pct();
            s.error_rate_pct = q.totals.error_rate_pct();
            s.avg_response_ms = s.avg_query_ms;
        }

        if let Some(r) = perf.requests.filter(|r| r.requests > 0) {
            s.total_requests = Some(r.requests);
            s.error_rate_pct = r.error_rate_pct;
            s.avg_response_ms = r.avg_response_ms;
        }

        s.memory_mb = perf.process.map(|p| p.rss_mb);
        s.cache_hit_rate_pct = perf
            .cache
            .as_ref()
            .filter(|c| c.lookups() > 0)
            .map(CacheStats::hit_rate_pct);
        s.pool_utilization_pct = perf
            .pool
            .as_ref()
            .and_then(|p| p.latest.map(|l| l.utilization_pct()));
        s
    }
}

// ============================================================
// Collector status
// ============================================================

#[derive(Clone, Debug, Serialize)]
pub struct CollectorStatus {
    pub name: String,
    pub enabled: bool,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_collection_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_collected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
