//! Named metric sources polled by the [`Aggregator`](crate::aggregator::Aggregator).
//!
//! A collector is an async or sync function returning a typed
//! [`CollectorPayload`]. The builtin constructors in [`builtin`] wrap the
//! core structures; hosts can register their own with a
//! [`CollectorPayload::Custom`] JSON payload.
//!
//! ```text
//!  QueryTelemetry ──┐
//!  PoolMonitor ─────┤
//!  ResultCache ─────┼──> Aggregator ──> AggregatedSnapshot (watch)
//!  /proc/self ──────┤
//!  RequestMetrics ──┘
//! ```

pub mod builtin;
pub mod process;
pub mod requests;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::cache::CacheStats;
use crate::pool::PoolMetrics;
use crate::stats::slow_log::SlowQueryEvent;
use crate::stats::tables::TableStats;
use crate::stats::{QueryStats, StatsTotals};

pub use process::ProcessMetrics;
pub use requests::{RequestMetrics, RequestMetricsRecorder};

/// Error type for a single collection.
#[derive(Debug, Error)]
pub enum CollectError {
    /// The source does not exist on this platform or was not configured.
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("{0}")]
    Failed(String),
}

/// Everything the telemetry facade reports in one collection.
#[derive(Clone, Debug, Default, Serialize)]
pub struct QueryMetrics {
    pub totals: StatsTotals,
    pub top_slow: Vec<QueryStats>,
    pub tables: Vec<TableStats>,
    pub recent_slow: Vec<SlowQueryEvent>,
    pub slow_log_len: usize,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CollectorPayload {
    Queries(QueryMetrics),
    Pool(PoolMetrics),
    Cache(CacheStats),
    Process(ProcessMetrics),
    Requests(RequestMetrics),
    Custom(serde_json::Value),
}

pub type CollectFuture =
    Pin<Box<dyn Future<Output = Result<CollectorPayload, CollectError>> + Send>>;

/// Type-erased async collector as stored in the registry.
pub type CollectorFn = Arc<dyn Fn() -> CollectFuture + Send + Sync>;

/// Type-erased synchronous collector; runs on the blocking pool.
pub type SyncCollectorFn = Arc<dyn Fn() -> Result<CollectorPayload, CollectError> + Send + Sync>;

/// Find the first payload matching `extract`.
pub fn find_payload<'a, T>(
    payloads: impl IntoIterator<Item = &'a CollectorPayload>,
    extract: impl Fn(&'a CollectorPayload) -> Option<T>,
) -> Option<T> {
    payloads.into_iter().find_map(extract)
}
