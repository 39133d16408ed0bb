use crate::analysis::advisor::{
    GlobalAdvisor, GlobalContext, Priority, Recommendation, RecommendationKind,
};

fn global(
    kind: RecommendationKind,
    priority: Priority,
    title: &str,
    description: String,
) -> Recommendation {
    Recommendation {
        kind,
        priority,
        title: title.to_string(),
        description,
        fingerprint: None,
        table: None,
    }
}

// ============================================================
// 1. SlowQueriesAdvisor
// ============================================================

pub struct SlowQueriesAdvisor;

impl GlobalAdvisor for SlowQueriesAdvisor {
    fn id(&self) -> &'static str {
        "global_slow_queries"
    }

    fn evaluate(&self, ctx: &GlobalContext) -> Vec<Recommendation> {
        let pct = ctx.totals.slow_pct();
        if pct <= ctx.thresholds.global_slow_pct {
            return Vec::new();
        }
        vec![global(
            RecommendationKind::GlobalSlowQueries,
            Priority::High,
            "Reduce overall query latency",
            format!(
                "{pct:.1}% of {} executions are slow. Start with the slowest fingerprints \
                 and the tables they touch.",
                ctx.totals.executions
            ),
        )]
    }
}

// ============================================================
// 2. ErrorRateAdvisor
// ============================================================

pub struct ErrorRateAdvisor;

impl GlobalAdvisor for ErrorRateAdvisor {
    fn id(&self) -> &'static str {
        "global_error_rate"
    }

    fn evaluate(&self, ctx: &GlobalContext) -> Vec<Recommendation> {
        let pct = ctx.totals.error_rate_pct();
        if pct <= ctx.thresholds.global_error_pct {
            return Vec::new();
        }
        vec![global(
            RecommendationKind::GlobalErrorRate,
            Priority::High,
            "Investigate query failures",
            format!(
                "{pct:.1}% of executions fail ({} of {}).",
                ctx.totals.errors, ctx.totals.executions
            ),
        )]
    }
}

// ============================================================
// 3. PoolUtilizationAdvisor
// ============================================================

pub struct PoolUtilizationAdvisor;

impl GlobalAdvisor for PoolUtilizationAdvisor {
    fn id(&self) -> &'static str {
        "pool_utilization"
    }

    fn evaluate(&self, ctx: &GlobalContext) -> Vec<Recommendation> {
        let Some(util) = ctx.pool_utilization_pct else {
            return Vec::new();
        };
        if util <= ctx.thresholds.pool_utilization_pct {
            return Vec::new();
        }
        vec![global(
            RecommendationKind::PoolUtilization,
            Priority::Medium,
            "Grow the connection pool",
            format!(
                "Pool utilization is {util:.0}%. Raise the pool size or shorten \
                 transactions that hold connections."
            ),
        )]
    }
}

// ============================================================
// 4. HotTablesAdvisor
// ============================================================

pub struct HotTablesAdvisor;

impl GlobalAdvisor for HotTablesAdvisor {
    fn id(&self) -> &'static str {
        "hot_tables"
    }

    fn evaluate(&self, ctx: &GlobalContext) -> Vec<Recommendation> {
        let th = ctx.thresholds;
        let mut by_slow: Vec<_> = ctx.tables.iter().collect();
        by_slow.sort_by(|a, b| {
            b.slow_pct()
                .total_cmp(&a.slow_pct())
                .then_with(|| a.table.cmp(&b.table))
        });

        by_slow
            .into_iter()
            .take(th.hot_table_limit)
            .filter(|t| t.slow_pct() > th.hot_table_slow_pct)
            .map(|t| Recommendation {
                table: Some(t.table.clone()),
                ..global(
                    RecommendationKind::HotTable,
                    Priority::Medium,
                    "Tune hot table",
                    format!(
                        "{:.1}% of {} queries against {} are slow ({} access pattern).",
                        t.slow_pct(),
                        t.count,
                        t.table,
                        t.access_pattern.label()
                    ),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::advisor::global_recommendations;
    use crate::config::AdvisorThresholds;
    use crate::fingerprint::OpKind;
    use crate::stats::StatsTotals;
    use crate::stats::tables::TableTracker;

    #[test]
    fn test_quiet_system() {
        let totals = StatsTotals {
            executions: 100,
            ..StatsTotals::default()
        };
        let th = AdvisorThresholds::default();
        let recs = global_recommendations(&GlobalContext {
            totals: &totals,
            tables: &[],
            pool_utilization_pct: Some(40.0),
            thresholds: &th,
        });
        assert!(recs.is_empty());
    }

    #[test]
    fn test_global_rates_and_pool() {
        let totals = StatsTotals {
            executions: 100,
            slow: 25,
            errors: 6,
            ..StatsTotals::default()
        };
        let th = AdvisorThresholds::default();
        let recs = global_recommendations(&GlobalContext {
            totals: &totals,
            tables: &[],
            pool_utilization_pct: Some(85.0),
            thresholds: &th,
        });
        let kinds: Vec<_> = recs.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RecommendationKind::GlobalSlowQueries,
                RecommendationKind::GlobalErrorRate,
                RecommendationKind::PoolUtilization,
            ]
        );
    }

    #[test]
    fn test_hot_tables_top_three() {
        let tracker = TableTracker::new(500.0, 100);
        // Slow fractions: a 100%, b 50%, c 40%, d 35%, e 10%
        let tables = [("a", 2, 0), ("b", 1, 1), ("c", 2, 3), ("d", 7, 13), ("e", 1, 9)];
        for (name, slow, fast) in tables {
            for _ in 0..slow {
                tracker.record(name, OpKind::Select, 900.0, false);
            }
            for _ in 0..fast {
                tracker.record(name, OpKind::Select, 5.0, false);
            }
        }
        let tables = tracker.snapshot();
        let totals = StatsTotals::default();
        let th = AdvisorThresholds::default();
        let recs = HotTablesAdvisor.evaluate(&GlobalContext {
            totals: &totals,
            tables: &tables,
            pool_utilization_pct: None,
            thresholds: &th,
        });
        let names: Vec<_> = recs.iter().filter_map(|r| r.table.as_deref()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
