use crate::analysis::rules::AlertRule;
use crate::analysis::{Alert, AlertKind, AnalysisContext, Severity};
use crate::fmt::{format_mb, format_ms};

/// Pick the severity for a value checked against a warning/critical pair.
fn graded(value: f64, warning: f64, critical: f64) -> Option<(Severity, f64)> {
    if value > critical {
        Some((Severity::Critical, critical))
    } else if value > warning {
        Some((Severity::Warning, warning))
    } else {
        None
    }
}

// ============================================================
// ErrorRateRule
// ============================================================

pub struct ErrorRateRule;

impl AlertRule for ErrorRateRule {
    fn id(&self) -> &'static str {
        "error_rate"
    }

    fn evaluate(&self, ctx: &AnalysisContext) -> Vec<Alert> {
        let th = ctx.thresholds;
        let value = ctx.summary.error_rate_pct;
        let Some((severity, threshold)) =
            graded(value, th.error_rate_warning_pct, th.error_rate_critical_pct)
        else {
            return Vec::new();
        };
        vec![Alert {
            kind: AlertKind::ErrorRate,
            severity,
            message: format!("Error rate {value:.1}% exceeds {threshold:.1}%"),
            value,
            threshold,
            timestamp: ctx.timestamp,
        }]
    }
}

// ============================================================
// ResponseTimeRule
// ============================================================

pub struct ResponseTimeRule;

impl AlertRule for ResponseTimeRule {
    fn id(&self) -> &'static str {
        "response_time"
    }

    fn evaluate(&self, ctx: &AnalysisContext) -> Vec<Alert> {
        let th = ctx.thresholds;
        let value = ctx.summary.avg_response_ms;
        let Some((severity, threshold)) = graded(
            value,
            th.response_time_warning_ms,
            th.response_time_critical_ms,
        ) else {
            return Vec::new();
        };
        vec![Alert {
            kind: AlertKind::ResponseTime,
            severity,
            message: format!(
                "Average response time {} exceeds {}",
                format_ms(value),
                format_ms(threshold)
            ),
            value,
            threshold,
            timestamp: ctx.timestamp,
        }]
    }
}

// ============================================================
// MemoryRule
// ============================================================

pub struct MemoryRule;

impl AlertRule for MemoryRule {
    fn id(&self) -> &'static str {
        "memory"
    }

    fn evaluate(&self, ctx: &AnalysisContext) -> Vec<Alert> {
        let threshold = ctx.thresholds.memory_warning_mb;
        match ctx.summary.memory_mb {
            Some(value) if value > threshold => vec![Alert {
                kind: AlertKind::Memory,
                severity: Severity::Warning,
                message: format!(
                    "Resident memory {} exceeds {}",
                    format_mb(value),
                    format_mb(threshold)
                ),
                value,
                threshold,
                timestamp: ctx.timestamp,
            }],
            _ => Vec::new(),
        }
    }
}

// ============================================================
// SlowQueriesRule
// ============================================================

pub struct SlowQueriesRule;

impl AlertRule for SlowQueriesRule {
    fn id(&self) -> &'static str {
        "slow_queries"
    }

    fn evaluate(&self, ctx: &AnalysisContext) -> Vec<Alert> {
        let threshold = ctx.thresholds.slow_query_warning_pct;
        let value = ctx.summary.slow_query_pct;
        if value <= threshold {
            return Vec::new();
        }
        vec![Alert {
            kind: AlertKind::SlowQueries,
            severity: Severity::Warning,
            message: format!("{value:.1}% of queries are slow (threshold {threshold:.0}%)"),
            value,
            threshold,
            timestamp: ctx.timestamp,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::MetricsSummary;
    use crate::config::HealthThresholds;
    use chrono::Utc;

    fn ctx<'a>(summary: &'a MetricsSummary, th: &'a HealthThresholds) -> AnalysisContext<'a> {
        AnalysisContext {
            summary,
            pool: None,
            cache: None,
            thresholds: th,
            saturation_ratio: 0.9,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_error_rate_grades() {
        let th = HealthThresholds::default();
        let mut s = MetricsSummary::default();

        s.error_rate_pct = 3.0;
        assert!(ErrorRateRule.evaluate(&ctx(&s, &th)).is_empty());

        s.error_rate_pct = 7.0;
        let a = ErrorRateRule.evaluate(&ctx(&s, &th));
        assert_eq!(a[0].severity, Severity::Warning);
        assert_eq!(a[0].threshold, 5.0);

        s.error_rate_pct = 11.0;
        let a = ErrorRateRule.evaluate(&ctx(&s, &th));
        assert_eq!(a[0].severity, Severity::Critical);
        assert_eq!(a[0].kind, AlertKind::ErrorRate);
    }

    #[test]
    fn test_response_time_critical() {
        let th = HealthThresholds::default();
        let s = MetricsSummary {
            avg_response_ms: 2500.0,
            ..MetricsSummary::default()
        };
        let a = ResponseTimeRule.evaluate(&ctx(&s, &th));
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].severity, Severity::Critical);
    }

    #[test]
    fn test_memory_requires_measurement() {
        let th = HealthThresholds::default();
        let mut s = MetricsSummary::default();
        assert!(MemoryRule.evaluate(&ctx(&s, &th)).is_empty());
        s.memory_mb = Some(1500.0);
        assert_eq!(MemoryRule.evaluate(&ctx(&s, &th)).len(), 1);
    }

    #[test]
    fn test_slow_queries() {
        let th = HealthThresholds::default();
        let s = MetricsSummary {
            slow_query_pct: 20.0,
            ..MetricsSummary::default()
        };
        assert!(SlowQueriesRule.evaluate(&ctx(&s, &th)).is_empty());
        let s = MetricsSummary {
            slow_query_pct: 21.0,
            ..MetricsSummary::default()
        };
        assert_eq!(SlowQueriesRule.evaluate(&ctx(&s, &th)).len(), 1);
    }
}
