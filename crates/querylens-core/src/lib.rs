//! querylens-core - in-process query telemetry and result caching.
//!
//! Provides:
//! - `fingerprint` - literal-independent query identifiers and shape parsing
//! - `stats` - per-query statistics, slow query log, per-table tracker
//! - `telemetry` - ingestion facade for the data-access layer
//! - `analysis` - alert rules, health score, recommendations, trends
//! - `pool` - connection pool sampling
//! - `collector` - named metric sources and builtin collectors
//! - `aggregator` - periodic collection and snapshot publishing
//! - `cache` - TTL + LRU result cache with cascade invalidation
//! - `config` - configuration sections with defaults
//! - `fmt` - shared formatting helpers

pub mod aggregator;
pub mod analysis;
pub mod cache;
pub mod collector;
pub mod config;
pub mod fingerprint;
pub mod fmt;
pub mod pool;
pub mod stats;
pub mod telemetry;
pub mod util;

pub use aggregator::{AggregatedSnapshot, Aggregator, MetricsSummary};
pub use cache::{InvalidationGraph, ResultCache};
pub use config::QueryLensConfig;
pub use fingerprint::Fingerprint;
pub use pool::{PoolMonitor, PoolSource, PoolStatus};
pub use telemetry::{QueryExecution, QueryTelemetry};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
