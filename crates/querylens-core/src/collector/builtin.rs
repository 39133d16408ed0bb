//! Collector constructors for the core structures.
//!
//! Each returns a sync closure suitable for
//! [`Aggregator::register_sync_collector`](crate::aggregator::Aggregator::register_sync_collector).

use std::sync::Arc;

use super::process::read_process_metrics;
use super::{CollectError, CollectorPayload, RequestMetricsRecorder};
use crate::cache::ResultCache;
use crate::pool::PoolMonitor;
use crate::telemetry::QueryTelemetry;

pub const TELEMETRY: &str = "telemetry";
pub const POOL: &str = "pool";
pub const CACHE: &str = "cache";
pub const PROCESS: &str = "process";
pub const REQUESTS: &str = "requests";

/// Refreshes per-query recommendations, then reports query metrics.
pub fn telemetry(
    telemetry: Arc<QueryTelemetry>,
    top_n: usize,
) -> impl Fn() -> Result<CollectorPayload, CollectError> + Send + Sync + 'static {
    move || {
        telemetry.refresh_recommendations();
        Ok(CollectorPayload::Queries(telemetry.query_metrics(top_n)))
    }
}

/// Reports the pool history collected by the monitor's own sampler.
pub fn pool(
    monitor: Arc<PoolMonitor>,
) -> impl Fn() -> Result<CollectorPayload, CollectError> + Send + Sync + 'static {
    move || Ok(CollectorPayload::Pool(monitor.metrics()))
}

pub fn cache<V>(
    cache: Arc<ResultCache<V>>,
) -> impl Fn() -> Result<CollectorPayload, CollectError> + Send + Sync + 'static
where
    V: Clone + Send + Sync + 'static,
{
    move || Ok(CollectorPayload::Cache(cache.stats()))
}

pub fn process() -> impl Fn() -> Result<CollectorPayload, CollectError> + Send + Sync + 'static {
    || read_process_metrics().map(CollectorPayload::Process)
}

pub fn requests(
    recorder: Arc<RequestMetricsRecorder>,
) -> impl Fn() -> Result<CollectorPayload, CollectError> + Send + Sync + 'static {
    move || Ok(CollectorPayload::Requests(recorder.snapshot()))
}
