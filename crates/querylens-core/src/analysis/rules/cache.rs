use crate::analysis::rules::AlertRule;
use crate::analysis::{Alert, AlertKind, AnalysisContext, Severity};

/// Low hit rate, reported only once enough lookups have happened.
pub struct CacheHitRateRule;

impl AlertRule for CacheHitRateRule {
    fn id(&self) -> &'static str {
        "cache_hit_rate"
    }

    fn evaluate(&self, ctx: &AnalysisContext) -> Vec<Alert> {
        let Some(cache) = ctx.cache else {
            return Vec::new();
        };
        let th = ctx.thresholds;
        if cache.lookups() < th.cache_min_lookups {
            return Vec::new();
        }
        let value = cache.hit_rate_pct();
        if value >= th.cache_hit_rate_min_pct {
            return Vec::new();
        }
        vec![Alert {
            kind: AlertKind::CacheHitRate,
            severity: Severity::Info,
            message: format!(
                "Cache hit rate {value:.1}% over {} lookups is below {:.0}%",
                cache.lookups(),
                th.cache_hit_rate_min_pct
            ),
            value,
            threshold: th.cache_hit_rate_min_pct,
            timestamp: ctx.timestamp,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::MetricsSummary;
    use crate::cache::CacheStats;
    use crate::config::HealthThresholds;
    use chrono::Utc;

    fn eval(stats: &CacheStats) -> Vec<Alert> {
        let summary = MetricsSummary::default();
        let th = HealthThresholds::default();
        CacheHitRateRule.evaluate(&AnalysisContext {
            summary: &summary,
            pool: None,
            cache: Some(stats),
            thresholds: &th,
            saturation_ratio: 0.9,
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn test_needs_min_lookups() {
        let stats = CacheStats {
            hits: 10,
            misses: 80,
            ..CacheStats::default()
        };
        assert!(eval(&stats).is_empty());
    }

    #[test]
    fn test_low_hit_rate_is_info() {
        let stats = CacheStats {
            hits: 30,
            misses: 70,
            ..CacheStats::default()
        };
        let alerts = eval(&stats);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Info);
        assert_eq!(alerts[0].value, 30.0);
    }

    #[test]
    fn test_healthy_hit_rate() {
        let stats = CacheStats {
            hits: 90,
            misses: 10,
            ..CacheStats::default()
        };
        assert!(eval(&stats).is_empty());
    }
}
