pub mod query;
pub mod recommendations;

use std::collections::HashMap;

use serde::Serialize;

use crate::config::AdvisorThresholds;
use crate::fingerprint::Fingerprint;
use crate::stats::tables::TableStats;
use crate::stats::{QueryStats, StatsTotals};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    // Per query
    HighErrorRate,
    SlowQuery,
    CacheCandidate,
    ComplexQuery,
    SlowTable,
    NPlusOne,
    // Global
    GlobalSlowQueries,
    GlobalErrorRate,
    PoolUtilization,
    HotTable,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub priority: Priority,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

// ============================================================
// Per-query advisors
// ============================================================

pub struct QueryContext<'a> {
    pub stats: &'a QueryStats,
    /// Slow fraction (percent) of the query's primary table.
    pub table_slow_pct: f64,
    /// Flagged by the cross-query N+1 scan.
    pub n_plus_one: bool,
    pub slow_threshold_ms: f64,
    pub thresholds: &'a AdvisorThresholds,
}

pub trait QueryAdvisor: Send + Sync {
    fn kind(&self) -> RecommendationKind;
    fn evaluate(&self, ctx: &QueryContext) -> Option<Recommendation>;
}

pub fn all_query_advisors() -> Vec<Box<dyn QueryAdvisor>> {
    vec![
        Box::new(query::ErrorRateAdvisor),
        Box::new(query::SlowQueryAdvisor),
        Box::new(query::CacheCandidateAdvisor),
        Box::new(query::ComplexQueryAdvisor),
        Box::new(query::SlowTableAdvisor),
        Box::new(query::NPlusOneAdvisor),
    ]
}

/// Full recommendation set for every query, keyed by fingerprint.
///
/// Each set holds at most one recommendation per kind, ordered by priority
/// then kind, so evaluating unchanged stats twice yields identical sets.
pub fn per_query_recommendations(
    stats: &[QueryStats],
    table_slow_pcts: &HashMap<String, f64>,
    slow_threshold_ms: f64,
    thresholds: &AdvisorThresholds,
) -> HashMap<Fingerprint, Vec<Recommendation>> {
    let advisors = all_query_advisors();
    let n_plus_one = query::n_plus_one_candidates(stats, thresholds);

    stats
        .iter()
        .map(|s| {
            let ctx = QueryContext {
                stats: s,
                table_slow_pct: table_slow_pcts.get(&s.table).copied().unwrap_or(0.0),
                n_plus_one: n_plus_one.contains(&s.fingerprint),
                slow_threshold_ms,
                thresholds,
            };
            let mut recs: Vec<Recommendation> =
                advisors.iter().filter_map(|a| a.evaluate(&ctx)).collect();
            recs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.kind.cmp(&b.kind)));
            recs.dedup_by_key(|r| r.kind);
            (s.fingerprint.clone(), recs)
        })
        .collect()
}

// ============================================================
// Global advisors
// ============================================================

pub struct GlobalContext<'a> {
    pub totals: &'a StatsTotals,
    pub tables: &'a [TableStats],
    pub pool_utilization_pct: Option<f64>,
    pub thresholds: &'a AdvisorThresholds,
}

pub trait GlobalAdvisor: Send + Sync {
    fn id(&self) -> &'static str;
    fn evaluate(&self, ctx: &GlobalContext) -> Vec<Recommendation>;
}

pub fn all_global_advisors() -> Vec<Box<dyn GlobalAdvisor>> {
    vec![
        Box::new(recommendations::SlowQueriesAdvisor),
        Box::new(recommendations::ErrorRateAdvisor),
        Box::new(recommendations::PoolUtilizationAdvisor),
        Box::new(recommendations::HotTablesAdvisor),
    ]
}

/// Global recommendations for one cycle, highest priority first.
pub fn global_recommendations(ctx: &GlobalContext) -> Vec<Recommendation> {
    let mut recs: Vec<Recommendation> = all_global_advisors()
        .iter()
        .flat_map(|a| a.evaluate(ctx))
        .collect();
    recs.sort_by(|a, b| b.priority.cmp(&a.priority));
    recs
}
