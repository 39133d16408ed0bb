pub mod advisor;
pub mod rules;
pub mod trends;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregator::MetricsSummary;
use crate::cache::CacheStats;
use crate::config::HealthThresholds;
use crate::pool::PoolMetrics;

// ============================================================
// Core types
// ============================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ErrorRate,
    ResponseTime,
    Memory,
    SlowQueries,
    PoolWaiting,
    PoolSaturation,
    CacheHitRate,
}

#[derive(Clone, Debug, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Critical,
    Warning,
    Good,
    Excellent,
}

impl HealthStatus {
    pub fn from_score(score: u8) -> Self {
        match score {
            90.. => HealthStatus::Excellent,
            75..=89 => HealthStatus::Good,
            50..=74 => HealthStatus::Warning,
            _ => HealthStatus::Critical,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            HealthStatus::Excellent => "excellent",
            HealthStatus::Good => "good",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        }
    }
}

/// Points subtracted from 100 per concern.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HealthBreakdown {
    pub error_rate: u8,
    pub response_time: u8,
    pub memory: u8,
    pub slow_queries: u8,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthReport {
    pub score: u8,
    pub status: HealthStatus,
    /// True when a critical threshold was crossed, forcing `Critical`.
    pub critical: bool,
    pub breakdown: HealthBreakdown,
}

impl Default for HealthReport {
    fn default() -> Self {
        Self {
            score: 100,
            status: HealthStatus::Excellent,
            critical: false,
            breakdown: HealthBreakdown::default(),
        }
    }
}

// ============================================================
// Analysis context passed to each rule
// ============================================================

pub struct AnalysisContext<'a> {
    pub summary: &'a MetricsSummary,
    pub pool: Option<&'a PoolMetrics>,
    pub cache: Option<&'a CacheStats>,
    pub thresholds: &'a HealthThresholds,
    pub saturation_ratio: f64,
    pub timestamp: DateTime<Utc>,
}

/// Evaluate every alert rule against one cycle's data, most severe first.
pub fn evaluate_alerts(ctx: &AnalysisContext) -> Vec<Alert> {
    let mut alerts: Vec<Alert> = rules::all_rules()
        .iter()
        .flat_map(|r| r.evaluate(ctx))
        .collect();
    alerts.sort_by(|a, b| b.severity.cmp(&a.severity));
    alerts
}

// ============================================================
// Health score
// ============================================================

/// Start at 100 and subtract a penalty per crossed threshold.
///
/// Error rate: 30 above critical, else 15 above warning. Average response:
/// 25 above critical, else 10 above warning. Memory: 20 above warning. Slow
/// fraction: 15 above warning. Crossing a critical threshold forces
/// `Critical` regardless of the numeric score.
pub fn compute_health(summary: &MetricsSummary, th: &HealthThresholds) -> HealthReport {
    let mut bd = HealthBreakdown::default();
    let mut critical = false;

    if summary.error_rate_pct > th.error_rate_critical_pct {
        bd.error_rate = 30;
        critical = true;
    } else if summary.error_rate_pct > th.error_rate_warning_pct {
        bd.error_rate = 15;
    }

    if summary.avg_response_ms > th.response_time_critical_ms {
        bd.response_time = 25;
        critical = true;
    } else if summary.avg_response_ms > th.response_time_warning_ms {
        bd.response_time = 10;
    }

    if summary.memory_mb.is_some_and(|mb| mb > th.memory_warning_mb) {
        bd.memory = 20;
    }

    if summary.slow_query_pct > th.slow_query_warning_pct {
        bd.slow_queries = 15;
    }

    let penalty = bd.error_rate + bd.response_time + bd.memory + bd.slow_queries;
    let score = 100u8.saturating_sub(penalty);
    let status = if critical {
        HealthStatus::Critical
    } else {
        HealthStatus::from_score(score)
    };

    HealthReport {
        score,
        status,
        critical,
        breakdown: bd,
    }
}
