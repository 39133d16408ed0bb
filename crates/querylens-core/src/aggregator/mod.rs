//! Periodic collection and snapshot publishing.
//!
//! The [`Aggregator`] owns a registry of named collectors. Each cycle it
//! polls every enabled collector in its own task, rebuilds the summary,
//! updates trends, recomputes alerts, global recommendations, insights and
//! anomalies, and publishes a new [`AggregatedSnapshot`] through a `watch`
//! channel. Readers always see a complete snapshot: an empty one before the
//! first cycle, then the latest published one.

mod interval;
mod snapshot;

pub use snapshot::{AggregatedSnapshot, CollectorStatus, MetricsSummary, PerformanceBreakdown};

use interval::IntervalTracker;

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::analysis::advisor::{GlobalContext, global_recommendations};
use crate::analysis::trends::{TrendPoint, TrendStore};
use crate::analysis::{Alert, AnalysisContext, compute_health, evaluate_alerts};
use crate::collector::{
    CollectError, CollectFuture, CollectorFn, CollectorPayload, SyncCollectorFn,
};
use crate::config::QueryLensConfig;
use crate::stats::StatsTotals;
use crate::util::lock;

struct Collected {
    payload: CollectorPayload,
    collection_time_ms: f64,
    timestamp: DateTime<Utc>,
}

#[derive(Clone)]
enum Collect {
    Async(CollectorFn),
    Blocking(SyncCollectorFn),
}

struct CollectorEntry {
    /// Unique per registration, so a replaced collector's in-flight result
    /// is not credited to its successor.
    id: u64,
    name: String,
    collect: Collect,
    enabled: bool,
    consecutive_failures: u32,
    total_failures: u64,
    last: Option<Collected>,
    last_error: Option<String>,
}

impl CollectorEntry {
    fn status(&self) -> CollectorStatus {
        CollectorStatus {
            name: self.name.clone(),
            enabled: self.enabled,
            consecutive_failures: self.consecutive_failures,
            total_failures: self.total_failures,
            last_collection_ms: self.last.as_ref().map(|c| c.collection_time_ms),
            last_collected_at: self.last.as_ref().map(|c| c.timestamp),
            last_error: self.last_error.clone(),
        }
    }
}

pub struct Aggregator {
    config: QueryLensConfig,
    collectors: Mutex<Vec<CollectorEntry>>,
    trends: TrendStore,
    intervals: Mutex<IntervalTracker>,
    alert_history: Mutex<VecDeque<Alert>>,
    cycles: AtomicU64,
    next_id: AtomicU64,
    /// Serializes cycles started by the loop and by direct callers.
    cycle_lock: tokio::sync::Mutex<()>,
    tx: watch::Sender<Arc<AggregatedSnapshot>>,
}

impl Aggregator {
    pub fn new(config: QueryLensConfig) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(AggregatedSnapshot::default()));
        Self {
            trends: TrendStore::new(config.aggregator.trend_capacity),
            intervals: Mutex::new(IntervalTracker::default()),
            alert_history: Mutex::new(VecDeque::new()),
            collectors: Mutex::new(Vec::new()),
            cycles: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
            cycle_lock: tokio::sync::Mutex::new(()),
            tx,
            config,
        }
    }

    // ============================================================
    // Registry
    // ============================================================

    /// Register an async collector. A collector with the same name is replaced.
    pub fn register_collector<F, Fut>(&self, name: &str, collect: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CollectorPayload, CollectError>> + Send + 'static,
    {
        let collect: CollectorFn = Arc::new(move || -> CollectFuture { Box::pin(collect()) });
        self.insert_collector(name, Collect::Async(collect));
    }

    /// Register a synchronous collector. It runs on the blocking thread pool,
    /// off the async workers, and a panic is isolated like an async one.
    pub fn register_sync_collector<F>(&self, name: &str, collect: F)
    where
        F: Fn() -> Result<CollectorPayload, CollectError> + Send + Sync + 'static,
    {
        self.insert_collector(name, Collect::Blocking(Arc::new(collect)));
    }

    fn insert_collector(&self, name: &str, collect: Collect) {
        let entry = CollectorEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            collect,
            enabled: true,
            consecutive_failures: 0,
            total_failures: 0,
            last: None,
            last_error: None,
        };
        let mut collectors = lock(&self.collectors);
        if let Some(existing) = collectors.iter_mut().find(|c| c.name == name) {
            debug!(collector = %name, "collector replaced");
            *existing = entry;
        } else {
            debug!(collector = %name, "collector registered");
            collectors.push(entry);
        }
    }

    pub fn unregister_collector(&self, name: &str) -> bool {
        let mut collectors = lock(&self.collectors);
        let before = collectors.len();
        collectors.retain(|c| c.name != name);
        collectors.len() != before
    }

    /// Re-enable a collector disabled after repeated failures.
    pub fn enable_collector(&self, name: &str) -> bool {
        let mut collectors = lock(&self.collectors);
        let Some(entry) = collectors.iter_mut().find(|c| c.name == name) else {
            return false;
        };
        entry.enabled = true;
        entry.consecutive_failures = 0;
        info!(collector = %name, "collector re-enabled");
        true
    }

    pub fn collector_status(&self) -> Vec<CollectorStatus> {
        lock(&self.collectors).iter().map(CollectorEntry::status).collect()
    }

    // ============================================================
    // Read API
    // ============================================================

    /// The latest published snapshot.
    pub fn aggregated_metrics(&self) -> Arc<AggregatedSnapshot> {
        self.tx.borrow().clone()
    }

    pub fn metrics_summary(&self) -> MetricsSummary {
        self.tx.borrow().summary.clone()
    }

    /// Up to `n` alerts from the bounded history, newest first.
    pub fn recent_alerts(&self, n: usize) -> Vec<Alert> {
        lock(&self.alert_history).iter().rev().take(n).cloned().collect()
    }

    /// Receiver notified on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<AggregatedSnapshot>> {
        self.tx.subscribe()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    // ============================================================
    // Collection cycle
    // ============================================================

    /// Run one collection cycle and publish the resulting snapshot.
    pub async fn run_cycle(&self) -> Arc<AggregatedSnapshot> {
        let _guard = self.cycle_lock.lock().await;
        let t0 = Instant::now();

        let jobs: Vec<(u64, String, Collect)> = lock(&self.collectors)
            .iter()
            .filter(|c| c.enabled)
            .map(|c| (c.id, c.name.clone(), c.collect.clone()))
            .collect();

        for (id, name, collect) in jobs {
            let started = Instant::now();
            let joined = match collect {
                Collect::Async(f) => tokio::spawn(f()).await,
                Collect::Blocking(f) => tokio::task::spawn_blocking(move || f()).await,
            };
            let result = match joined {
                Ok(Ok(payload)) => Ok(payload),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) if e.is_panic() => {
                    error!(collector = %name, "collector panicked");
                    Err(format!("collector panicked: {e}"))
                }
                Err(e) => Err(e.to_string()),
            };
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            self.record_result(id, &name, result, elapsed_ms);
        }

        let snapshot = Arc::new(self.build_snapshot());
        let cycle = snapshot.cycle;
        self.tx.send_replace(snapshot.clone());

        let elapsed = t0.elapsed();
        if cycle == 1 {
            info!(
                duration_ms = elapsed.as_millis() as u64,
                health = snapshot.summary.health.score,
                "first snapshot published"
            );
        } else {
            debug!(
                duration_ms = elapsed.as_millis() as u64,
                cycle,
                alerts = snapshot.alerts.len(),
                "cycle completed"
            );
        }
        let interval = self.config.aggregator.collection_interval();
        if elapsed > interval / 2 {
            warn!(
                duration_ms = elapsed.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "cycle exceeded 50% of interval"
            );
        }

        snapshot
    }

    fn record_result(
        &self,
        id: u64,
        name: &str,
        result: Result<CollectorPayload, String>,
        elapsed_ms: f64,
    ) {
        let max_failures = self.config.aggregator.max_consecutive_failures;
        let mut collectors = lock(&self.collectors);
        // Unregistered or replaced while running.
        let Some(entry) = collectors.iter_mut().find(|c| c.id == id) else {
            debug!(collector = %name, "dropping result of a replaced collector");
            return;
        };
        match result {
            Ok(payload) => {
                entry.consecutive_failures = 0;
                entry.last_error = None;
                entry.last = Some(Collected {
                    payload,
                    collection_time_ms: elapsed_ms,
                    timestamp: Utc::now(),
                });
            }
            Err(message) => {
                entry.consecutive_failures += 1;
                entry.total_failures += 1;
                warn!(
                    collector = %name,
                    failures = entry.consecutive_failures,
                    error = %message,
                    "collector failed"
                );
                entry.last_error = Some(message);
                if entry.consecutive_failures >= max_failures {
                    entry.enabled = false;
                    error!(
                        collector = %name,
                        failures = entry.consecutive_failures,
                        "collector disabled after consecutive failures"
                    );
                }
            }
        }
    }

    fn build_snapshot(&self) -> AggregatedSnapshot {
        let now = Utc::now();
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let cfg = &self.config;

        let (performance, collectors) = {
            let entries = lock(&self.collectors);
            let payloads: Vec<(&str, &CollectorPayload)> = entries
                .iter()
                .filter(|c| c.enabled)
                .filter_map(|c| c.last.as_ref().map(|l| (c.name.as_str(), &l.payload)))
                .collect();
            let perf = PerformanceBreakdown::from_payloads(&payloads);
            let status: Vec<CollectorStatus> = entries.iter().map(CollectorEntry::status).collect();
            (perf, status)
        };

        let mut summary = MetricsSummary::from_breakdown(&performance);
        summary.health = compute_health(&summary, &cfg.health);

        let values = lock(&self.intervals).trend_values(&performance, &summary);
        for (metric, value) in values {
            self.trends.update(metric, TrendPoint { timestamp: now, value });
        }

        let alerts = evaluate_alerts(&AnalysisContext {
            summary: &summary,
            pool: performance.pool.as_ref(),
            cache: performance.cache.as_ref(),
            thresholds: &cfg.health,
            saturation_ratio: cfg.pool.saturation_ratio,
            timestamp: now,
        });
        self.push_alerts(&alerts);

        let empty_totals = StatsTotals::default();
        let (totals, tables) = match &performance.queries {
            Some(q) => (&q.totals, q.tables.as_slice()),
            None => (&empty_totals, &[][..]),
        };
        let recommendations = global_recommendations(&GlobalContext {
            totals,
            tables,
            pool_utilization_pct: summary.pool_utilization_pct,
            thresholds: &cfg.advisor,
        });

        let (insights, anomalies) = self.trends.analyze(&cfg.anomaly);
        for a in &anomalies {
            warn!(
                metric = a.metric.label(),
                value = a.value,
                baseline = a.baseline,
                "anomaly detected"
            );
        }

        AggregatedSnapshot {
            generated_at: Some(now),
            cycle,
            summary,
            performance,
            trends: self.trends.snapshot(),
            alerts,
            recommendations,
            insights,
            anomalies,
            collectors,
        }
    }

    fn push_alerts(&self, alerts: &[Alert]) {
        let cap = self.config.aggregator.alert_history_len;
        let mut history = lock(&self.alert_history);
        for alert in alerts {
            history.push_back(alert.clone());
        }
        while history.len() > cap {
            history.pop_front();
        }
    }

    // ============================================================
    // Retention
    // ============================================================

    /// Drop trend points and alerts older than the retention window, measured
    /// from `now`. Returns `(trend points, alerts)` removed.
    pub fn sweep_retention_at(&self, now: DateTime<Utc>) -> (usize, usize) {
        // A window reaching before the representable range keeps everything.
        let Some(cutoff) = now.checked_sub_signed(self.config.aggregator.retention()) else {
            return (0, 0);
        };
        let points = self.trends.prune_older_than(cutoff);
        let mut history = lock(&self.alert_history);
        let before = history.len();
        history.retain(|a| a.timestamp >= cutoff);
        let alerts = before - history.len();
        (points, alerts)
    }

    // ============================================================
    // Background loop
    // ============================================================

    /// Run collection cycles and the retention sweep on the current runtime
    /// until the returned handle is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_loop().await })
    }

    async fn run_loop(&self) {
        let mut collect_tick = tokio::time::interval(self.config.aggregator.collection_interval());
        collect_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let retention = self.config.aggregator.retention_sweep_interval();
        let mut retention_tick =
            tokio::time::interval_at(tokio::time::Instant::now() + retention, retention);
        retention_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = collect_tick.tick() => {
                    self.run_cycle().await;
                }
                _ = retention_tick.tick() => {
                    let (points, alerts) = self.sweep_retention_at(Utc::now());
                    debug!(points, alerts, "retention sweep");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::advisor::RecommendationKind;
    use crate::analysis::trends::TrendMetric;
    use crate::analysis::{AlertKind, HealthStatus};
    use crate::cache::ResultCache;
    use crate::collector::{RequestMetricsRecorder, builtin};
    use crate::config::CacheConfig;
    use crate::pool::{PoolMonitor, PoolSource, PoolStatus};
    use crate::telemetry::{DEFAULT_TOP_N, QueryExecution, QueryTelemetry};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn aggregator() -> Aggregator {
        Aggregator::new(QueryLensConfig::default())
    }

    fn custom(n: i64) -> Result<CollectorPayload, CollectError> {
        Ok(CollectorPayload::Custom(serde_json::json!(n)))
    }

    #[test]
    fn test_empty_snapshot_before_first_cycle() {
        let agg = aggregator();
        let snap = agg.aggregated_metrics();
        assert_eq!(snap.cycle, 0);
        assert!(snap.generated_at.is_none());
        assert_eq!(agg.metrics_summary().health.score, 100);
        assert!(agg.recent_alerts(10).is_empty());
    }

    #[tokio::test]
    async fn test_failing_collector_disabled_after_five() {
        let agg = aggregator();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        agg.register_sync_collector("flaky", move || {
            c.fetch_add(1, Ordering::SeqCst);
            Err(CollectError::Failed("boom".to_string()))
        });
        agg.register_sync_collector("steady", || custom(1));

        for _ in 0..7 {
            agg.run_cycle().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        let status = agg.collector_status();
        let flaky = status.iter().find(|s| s.name == "flaky").unwrap();
        assert!(!flaky.enabled);
        assert_eq!(flaky.consecutive_failures, 5);
        assert_eq!(flaky.last_error.as_deref(), Some("boom"));
        let steady = status.iter().find(|s| s.name == "steady").unwrap();
        assert!(steady.enabled);
        assert!(steady.last_collection_ms.is_some());

        let snap = agg.aggregated_metrics();
        assert_eq!(snap.cycle, 7);
        assert_eq!(snap.performance.custom["steady"], 1);

        assert!(agg.enable_collector("flaky"));
        agg.run_cycle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert!(!agg.enable_collector("missing"));
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let agg = aggregator();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        agg.register_sync_collector("alternating", move || {
            if c.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                Err(CollectError::Failed("odd".to_string()))
            } else {
                custom(2)
            }
        });
        for _ in 0..10 {
            agg.run_cycle().await;
        }
        let status = &agg.collector_status()[0];
        assert!(status.enabled);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.total_failures, 5);
    }

    #[tokio::test]
    async fn test_panicking_collector_is_isolated() {
        let agg = aggregator();
        agg.register_sync_collector("panics", || -> Result<CollectorPayload, CollectError> {
            panic!("collector bug")
        });
        agg.register_collector("async_ok", || async { custom(3) });
        let snap = agg.run_cycle().await;
        assert_eq!(snap.performance.custom["async_ok"], 3);
        let status = agg.collector_status();
        let p = status.iter().find(|s| s.name == "panics").unwrap();
        assert_eq!(p.consecutive_failures, 1);
        assert!(p.last_error.as_deref().unwrap().contains("panicked"));
    }

    struct SaturatedPool;

    impl PoolSource for SaturatedPool {
        fn status(&self) -> Result<PoolStatus, CollectError> {
            Ok(PoolStatus {
                active: 10,
                idle: 0,
                waiting: 2,
                max: 10,
            })
        }
    }

    #[tokio::test]
    async fn test_full_pipeline() {
        let config = QueryLensConfig::default();
        let agg = aggregator();
        let telemetry = Arc::new(QueryTelemetry::new(&config));
        let cache = Arc::new(ResultCache::<String>::new(CacheConfig::default()));
        let pool = Arc::new(PoolMonitor::new(Arc::new(SaturatedPool), config.pool.clone()));
        pool.sample_now().unwrap();

        for i in 0..100 {
            let exec = QueryExecution::new("select * from games where id = $1", 20.0).rows(1);
            let exec = if i < 11 { exec.error("timeout") } else { exec };
            telemetry.record_query_execution(exec);
        }
        for _ in 0..120 {
            cache.get("missing");
        }

        agg.register_sync_collector(
            builtin::TELEMETRY,
            builtin::telemetry(telemetry.clone(), DEFAULT_TOP_N),
        );
        agg.register_sync_collector(builtin::POOL, builtin::pool(pool));
        agg.register_sync_collector(builtin::CACHE, builtin::cache(cache));

        let mut rx = agg.subscribe();
        let snap = agg.run_cycle().await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().cycle, 1);

        let s = &snap.summary;
        assert_eq!(s.total_queries, 100);
        assert_eq!(s.error_rate_pct, 11.0);
        assert_eq!(s.pool_utilization_pct, Some(100.0));
        assert_eq!(s.cache_hit_rate_pct, Some(0.0));
        assert_eq!(s.health.status, HealthStatus::Critical);

        let kinds: Vec<AlertKind> = snap.alerts.iter().map(|a| a.kind).collect();
        assert_eq!(kinds[..2], [AlertKind::ErrorRate, AlertKind::PoolSaturation]);
        assert!(kinds.contains(&AlertKind::PoolWaiting));
        assert!(kinds.contains(&AlertKind::CacheHitRate));

        let rec_kinds: Vec<_> = snap.recommendations.iter().map(|r| r.kind).collect();
        assert!(rec_kinds.contains(&RecommendationKind::GlobalErrorRate));
        assert!(rec_kinds.contains(&RecommendationKind::PoolUtilization));

        assert_eq!(snap.trends[&TrendMetric::ErrorRate].len(), 1);
        assert!(!snap.trends.contains_key(&TrendMetric::ResourceUsage));
        assert_eq!(agg.recent_alerts(100).len(), snap.alerts.len());

        let q = telemetry.top_slow_queries(1);
        assert!(
            q[0].recommendations
                .iter()
                .any(|r| r.kind == RecommendationKind::HighErrorRate)
        );
    }

    #[tokio::test]
    async fn test_requests_drive_response_time() {
        let agg = aggregator();
        let recorder = Arc::new(RequestMetricsRecorder::new());
        recorder.record(2500.0, false);
        agg.register_sync_collector(builtin::REQUESTS, builtin::requests(recorder));
        let snap = agg.run_cycle().await;
        assert_eq!(snap.summary.avg_response_ms, 2500.0);
        assert_eq!(snap.summary.health.breakdown.response_time, 25);
        assert_eq!(snap.alerts[0].kind, AlertKind::ResponseTime);
    }

    #[tokio::test]
    async fn test_alert_history_bounded_and_retained() {
        let mut config = QueryLensConfig::default();
        config.aggregator.alert_history_len = 3;
        let agg = Aggregator::new(config);
        let recorder = Arc::new(RequestMetricsRecorder::new());
        let r = recorder.clone();
        agg.register_sync_collector(builtin::REQUESTS, builtin::requests(recorder));
        for _ in 0..5 {
            r.record(10.0, true);
            agg.run_cycle().await;
        }
        assert_eq!(agg.recent_alerts(10).len(), 3);

        let (points, alerts) = agg.sweep_retention_at(Utc::now() + chrono::Duration::hours(25));
        assert_eq!(alerts, 3);
        // Response time and error rate for 5 cycles.
        assert_eq!(points, 10);
        assert!(agg.recent_alerts(10).is_empty());

        let (points, alerts) = agg.sweep_retention_at(Utc::now());
        assert_eq!((points, alerts), (0, 0));
    }

    #[tokio::test]
    async fn test_huge_retention_keeps_everything() {
        let mut config = QueryLensConfig::default();
        config.aggregator.retention_hours = 1_000_000_000_000_000;
        let agg = Aggregator::new(config);
        let recorder = Arc::new(RequestMetricsRecorder::new());
        recorder.record(10.0, true);
        agg.register_sync_collector(builtin::REQUESTS, builtin::requests(recorder));
        agg.run_cycle().await;
        assert_eq!(agg.sweep_retention_at(Utc::now()), (0, 0));
        assert!(!agg.recent_alerts(10).is_empty());
    }

    #[tokio::test]
    async fn test_spike_becomes_anomaly() {
        let agg = aggregator();
        let recorder = Arc::new(RequestMetricsRecorder::new());
        let r = recorder.clone();
        agg.register_sync_collector(builtin::REQUESTS, builtin::requests(recorder));
        for _ in 0..10 {
            for _ in 0..1000 {
                r.record(100.0, false);
            }
            let snap = agg.run_cycle().await;
            assert!(snap.anomalies.is_empty());
        }
        // The lifetime average only reaches ~364ms; this cycle alone averages 3000ms.
        for _ in 0..1000 {
            r.record(3000.0, false);
        }
        let snap = agg.run_cycle().await;
        let points = &snap.trends[&TrendMetric::ResponseTime];
        assert_eq!(points.len(), 11);
        assert!(points[10].value > 2900.0);
        assert!(
            snap.anomalies
                .iter()
                .any(|a| a.metric == TrendMetric::ResponseTime)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_cycles() {
        let agg = Arc::new(aggregator());
        agg.register_sync_collector("steady", || custom(1));
        let handle = agg.clone().spawn();
        // Cycles at 0s, 30s and 60s.
        tokio::time::sleep(Duration::from_secs(65)).await;
        handle.abort();
        assert_eq!(agg.cycles(), 3);
    }

    #[tokio::test]
    async fn test_replaced_during_cycle_drops_old_result() {
        let agg = Arc::new(aggregator());
        let started = Arc::new(tokio::sync::Notify::new());
        let gate = Arc::new(tokio::sync::Notify::new());
        let (s, g) = (started.clone(), gate.clone());
        agg.register_collector("a", move || {
            let (s, g) = (s.clone(), g.clone());
            async move {
                s.notify_one();
                g.notified().await;
                custom(1)
            }
        });

        let cycle = tokio::spawn({
            let agg = agg.clone();
            async move { agg.run_cycle().await }
        });
        started.notified().await;
        agg.register_sync_collector("a", || custom(2));
        gate.notify_one();
        let snap = cycle.await.unwrap();

        assert!(!snap.performance.custom.contains_key("a"));
        let status = agg.collector_status();
        assert_eq!(status.len(), 1);
        assert!(status[0].last_collection_ms.is_none());

        let snap = agg.run_cycle().await;
        assert_eq!(snap.performance.custom["a"], 2);
    }

    #[tokio::test]
    async fn test_sync_collector_runs_off_async_workers() {
        let agg = aggregator();
        agg.register_sync_collector("blocking", || {
            // Panics if called from an async worker thread.
            let rt = tokio::runtime::Handle::current();
            Ok(CollectorPayload::Custom(serde_json::json!(
                rt.block_on(async { 7 })
            )))
        });
        let snap = agg.run_cycle().await;
        assert_eq!(snap.performance.custom["blocking"], 7);
    }

    #[tokio::test]
    async fn test_unregister() {
        let agg = aggregator();
        agg.register_sync_collector("a", || custom(1));
        agg.register_sync_collector("a", || custom(2));
        assert_eq!(agg.collector_status().len(), 1);
        let snap = agg.run_cycle().await;
        assert_eq!(snap.performance.custom["a"], 2);
        assert!(agg.unregister_collector("a"));
        assert!(!agg.unregister_collector("a"));
    }
}
