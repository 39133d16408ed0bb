//! Per-cycle trend values derived from cumulative counters.
//!
//! Collectors report lifetime totals. Trends and spike detection need the
//! activity of the last cycle only, so the tracker keeps the previous totals
//! and turns each new report into a delta.

use super::snapshot::{MetricsSummary, PerformanceBreakdown};
use crate::analysis::trends::TrendMetric;
use crate::util::pct;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Counters {
    count: u64,
    errors: u64,
    total_ms: f64,
}

impl Counters {
    /// Activity since `prev`. `None` when nothing ran or the source went
    /// backwards (cleared, or fingerprints evicted).
    fn since(self, prev: Counters) -> Option<Counters> {
        if self.count <= prev.count || self.errors < prev.errors {
            return None;
        }
        Some(Counters {
            count: self.count - prev.count,
            errors: self.errors - prev.errors,
            total_ms: (self.total_ms - prev.total_ms).max(0.0),
        })
    }

    fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct IntervalTracker {
    queries: Counters,
    requests: Counters,
}

impl IntervalTracker {
    /// Trend values for this cycle. Latency and error rate come from requests
    /// when any arrived since the last cycle, otherwise from queries; metrics
    /// with no activity this cycle are omitted.
    pub(crate) fn trend_values(
        &mut self,
        perf: &PerformanceBreakdown,
        summary: &MetricsSummary,
    ) -> Vec<(TrendMetric, f64)> {
        let queries = perf.queries.as_ref().and_then(|q| {
            advance(
                &mut self.queries,
                Counters {
                    count: q.totals.executions,
                    errors: q.totals.errors,
                    total_ms: q.totals.total_ms,
                },
            )
        });
        let requests = perf.requests.and_then(|r| {
            advance(
                &mut self.requests,
                Counters {
                    count: r.requests,
                    errors: r.errors,
                    total_ms: r.avg_response_ms * r.requests as f64,
                },
            )
        });

        let mut values = Vec::new();
        if let Some(q) = queries {
            values.push((TrendMetric::QueryTime, q.avg_ms()));
        }
        if let Some(d) = requests.or(queries) {
            values.push((TrendMetric::ResponseTime, d.avg_ms()));
            values.push((TrendMetric::ErrorRate, pct(d.errors, d.count)));
        }
        if let Some(mb) = summary.memory_mb {
            values.push((TrendMetric::ResourceUsage, mb));
        }
        values
    }
}

/// Store `current` as the new baseline and return the activity since the old one.
fn advance(baseline: &mut Counters, current: Counters) -> Option<Counters> {
    let delta = current.since(*baseline);
    *baseline = current;
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{QueryMetrics, RequestMetrics};
    use crate::stats::StatsTotals;

    fn queries(executions: u64, errors: u64, total_ms: f64) -> PerformanceBreakdown {
        PerformanceBreakdown {
            queries: Some(QueryMetrics {
                totals: StatsTotals {
                    executions,
                    errors,
                    total_ms,
                    ..StatsTotals::default()
                },
                ..QueryMetrics::default()
            }),
            ..PerformanceBreakdown::default()
        }
    }

    fn value(values: &[(TrendMetric, f64)], metric: TrendMetric) -> Option<f64> {
        values.iter().find(|(m, _)| *m == metric).map(|(_, v)| *v)
    }

    #[test]
    fn test_values_are_per_cycle() {
        let mut t = IntervalTracker::default();
        let summary = MetricsSummary::default();

        let v = t.trend_values(&queries(100, 0, 10_000.0), &summary);
        assert_eq!(value(&v, TrendMetric::QueryTime), Some(100.0));

        // 10 executions at 3000ms on top of the previous 100.
        let v = t.trend_values(&queries(110, 5, 40_000.0), &summary);
        assert_eq!(value(&v, TrendMetric::QueryTime), Some(3000.0));
        assert_eq!(value(&v, TrendMetric::ResponseTime), Some(3000.0));
        assert_eq!(value(&v, TrendMetric::ErrorRate), Some(50.0));
        assert_eq!(value(&v, TrendMetric::ResourceUsage), None);
    }

    #[test]
    fn test_idle_cycle_and_reset_are_skipped() {
        let mut t = IntervalTracker::default();
        let summary = MetricsSummary::default();
        t.trend_values(&queries(100, 0, 1_000.0), &summary);
        assert!(t.trend_values(&queries(100, 0, 1_000.0), &summary).is_empty());
        // Totals went down: new baseline, no point.
        assert!(t.trend_values(&queries(40, 0, 400.0), &summary).is_empty());
        let v = t.trend_values(&queries(50, 0, 900.0), &summary);
        assert_eq!(value(&v, TrendMetric::QueryTime), Some(50.0));
    }

    #[test]
    fn test_requests_take_precedence() {
        let mut t = IntervalTracker::default();
        let mut perf = queries(10, 0, 100.0);
        perf.requests = Some(RequestMetrics {
            requests: 4,
            errors: 1,
            avg_response_ms: 250.0,
            error_rate_pct: 25.0,
        });
        let v = t.trend_values(&perf, &MetricsSummary::default());
        assert_eq!(value(&v, TrendMetric::QueryTime), Some(10.0));
        assert_eq!(value(&v, TrendMetric::ResponseTime), Some(250.0));
        assert_eq!(value(&v, TrendMetric::ErrorRate), Some(25.0));
    }
}
