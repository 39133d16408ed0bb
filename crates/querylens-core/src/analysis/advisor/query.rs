use std::collections::{HashMap, HashSet};

use crate::analysis::advisor::{
    Priority, QueryAdvisor, QueryContext, Recommendation, RecommendationKind,
};
use crate::config::AdvisorThresholds;
use crate::fingerprint::{Fingerprint, OpKind};
use crate::fmt::format_ms;
use crate::stats::QueryStats;

// ============================================================
// Helpers
// ============================================================

fn for_query(
    ctx: &QueryContext,
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
        fingerprint: Some(ctx.stats.fingerprint.clone()),
        table: Some(ctx.stats.table.clone()),
    }
}

/// Fingerprints that look like one half of an N+1 pattern: many distinct,
/// fast, single-row selects against the same table, each executed often.
pub fn n_plus_one_candidates(
    stats: &[QueryStats],
    th: &AdvisorThresholds,
) -> HashSet<Fingerprint> {
    let mut by_table: HashMap<&str, Vec<&Fingerprint>> = HashMap::new();
    for s in stats {
        let single_row = s.avg_rows().is_some_and(|rows| rows <= 1.0);
        if s.op_kind == OpKind::Select
            && single_row
            && s.avg_ms() < th.n_plus_one_max_avg_ms
            && s.count > th.n_plus_one_min_count
        {
            by_table.entry(s.table.as_str()).or_default().push(&s.fingerprint);
        }
    }
    by_table
        .into_values()
        .filter(|fps| fps.len() >= th.n_plus_one_min_fingerprints)
        .flatten()
        .cloned()
        .collect()
}

// ============================================================
// 1. ErrorRateAdvisor
// ============================================================

pub struct ErrorRateAdvisor;

impl QueryAdvisor for ErrorRateAdvisor {
    fn kind(&self) -> RecommendationKind {
        RecommendationKind::HighErrorRate
    }

    fn evaluate(&self, ctx: &QueryContext) -> Option<Recommendation> {
        let rate = ctx.stats.error_rate_pct();
        if rate <= ctx.thresholds.query_error_rate_pct {
            return None;
        }
        Some(for_query(
            ctx,
            self.kind(),
            Priority::High,
            "Investigate failing query",
            format!(
                "{rate:.1}% of {} executions failed. Check constraint violations, \
                 timeouts and malformed parameters for this statement.",
                ctx.stats.count
            ),
        ))
    }
}

// ============================================================
// 2. SlowQueryAdvisor
// ============================================================

pub struct SlowQueryAdvisor;

impl QueryAdvisor for SlowQueryAdvisor {
    fn kind(&self) -> RecommendationKind {
        RecommendationKind::SlowQuery
    }

    fn evaluate(&self, ctx: &QueryContext) -> Option<Recommendation> {
        let avg = ctx.stats.avg_ms();
        if avg <= ctx.slow_threshold_ms || ctx.stats.count <= ctx.thresholds.slow_min_count {
            return None;
        }
        Some(for_query(
            ctx,
            self.kind(),
            Priority::High,
            "Optimize slow query",
            format!(
                "Average {} over {} executions. Review the execution plan for sequential \
                 scans on {} and add indexes on filtered or joined columns.",
                format_ms(avg),
                ctx.stats.count,
                ctx.stats.table
            ),
        ))
    }
}

// ============================================================
// 3. CacheCandidateAdvisor
// ============================================================

pub struct CacheCandidateAdvisor;

impl QueryAdvisor for CacheCandidateAdvisor {
    fn kind(&self) -> RecommendationKind {
        RecommendationKind::CacheCandidate
    }

    fn evaluate(&self, ctx: &QueryContext) -> Option<Recommendation> {
        let th = ctx.thresholds;
        let avg = ctx.stats.avg_ms();
        if ctx.stats.count <= th.cache_candidate_min_count || avg <= th.cache_candidate_min_avg_ms {
            return None;
        }
        Some(for_query(
            ctx,
            self.kind(),
            Priority::Medium,
            "Cache query results",
            format!(
                "Executed {} times at {} average. Serving it from the result cache \
                 would remove most of this load.",
                ctx.stats.count,
                format_ms(avg)
            ),
        ))
    }
}

// ============================================================
// 4. ComplexQueryAdvisor
// ============================================================

pub struct ComplexQueryAdvisor;

impl QueryAdvisor for ComplexQueryAdvisor {
    fn kind(&self) -> RecommendationKind {
        RecommendationKind::ComplexQuery
    }

    fn evaluate(&self, ctx: &QueryContext) -> Option<Recommendation> {
        let th = ctx.thresholds;
        let avg = ctx.stats.avg_ms();
        if ctx.stats.complexity <= th.complex_min_score || avg <= th.complex_min_avg_ms {
            return None;
        }
        Some(for_query(
            ctx,
            self.kind(),
            Priority::Medium,
            "Simplify complex query",
            format!(
                "Complexity {} with {} average. Consider splitting joins and subqueries, \
                 or precomputing the result in a view.",
                ctx.stats.complexity,
                format_ms(avg)
            ),
        ))
    }
}

// ============================================================
// 5. SlowTableAdvisor
// ============================================================

pub struct SlowTableAdvisor;

impl QueryAdvisor for SlowTableAdvisor {
    fn kind(&self) -> RecommendationKind {
        RecommendationKind::SlowTable
    }

    fn evaluate(&self, ctx: &QueryContext) -> Option<Recommendation> {
        if ctx.table_slow_pct <= ctx.thresholds.table_slow_pct {
            return None;
        }
        Some(for_query(
            ctx,
            self.kind(),
            Priority::Medium,
            "Review table indexing",
            format!(
                "{:.1}% of queries against {} are slow. Check its indexes and bloat.",
                ctx.table_slow_pct, ctx.stats.table
            ),
        ))
    }
}

// ============================================================
// 6. NPlusOneAdvisor
// ============================================================

pub struct NPlusOneAdvisor;

impl QueryAdvisor for NPlusOneAdvisor {
    fn kind(&self) -> RecommendationKind {
        RecommendationKind::NPlusOne
    }

    fn evaluate(&self, ctx: &QueryContext) -> Option<Recommendation> {
        if !ctx.n_plus_one {
            return None;
        }
        Some(for_query(
            ctx,
            self.kind(),
            Priority::Medium,
            "Possible N+1 query pattern",
            format!(
                "Many fast single-row selects hit {}. Batch them into one query with \
                 an IN list or a join.",
                ctx.stats.table
            ),
        ))
    }
}
