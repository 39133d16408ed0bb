//! Construction-time configuration.
//!
//! Every field has a default, so an empty JSON object (`{}`) is a valid
//! configuration. Thresholds used by the advisor and anomaly detector are
//! heuristics and are meant to be tuned per deployment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryLensConfig {
    pub telemetry: TelemetryConfig,
    pub cache: CacheConfig,
    pub pool: PoolConfig,
    pub aggregator: AggregatorConfig,
    pub health: HealthThresholds,
    pub advisor: AdvisorThresholds,
    pub anomaly: AnomalyConfig,
}

impl QueryLensConfig {
    /// Parse a JSON document and validate it.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.telemetry;
        if t.slow_threshold_ms <= 0.0 || t.very_slow_threshold_ms < t.slow_threshold_ms {
            return Err(ConfigError::Invalid(format!(
                "slow threshold ({}ms) must be positive and not above very slow threshold ({}ms)",
                t.slow_threshold_ms, t.very_slow_threshold_ms
            )));
        }
        non_zero("telemetry.max_fingerprints", t.max_fingerprints)?;
        non_zero("telemetry.max_tables", t.max_tables)?;
        non_zero("telemetry.slow_log_capacity", t.slow_log_capacity)?;
        non_zero("telemetry.recent_rows_capacity", t.recent_rows_capacity)?;
        non_zero("cache.max_entries", self.cache.max_entries)?;
        non_zero("cache.default_ttl_ms", self.cache.default_ttl_ms as usize)?;
        non_zero("pool.sample_interval_secs", self.pool.sample_interval_secs as usize)?;
        non_zero("pool.history_len", self.pool.history_len)?;
        non_zero(
            "aggregator.collection_interval_secs",
            self.aggregator.collection_interval_secs as usize,
        )?;
        non_zero("aggregator.trend_capacity", self.aggregator.trend_capacity)?;
        if !(1..=MAX_RETENTION_HOURS).contains(&self.aggregator.retention_hours) {
            return Err(ConfigError::Invalid(format!(
                "aggregator.retention_hours must be between 1 and {MAX_RETENTION_HOURS}"
            )));
        }
        non_zero(
            "aggregator.max_consecutive_failures",
            self.aggregator.max_consecutive_failures as usize,
        )?;
        non_zero("anomaly.spike_window", self.anomaly.spike_window)?;
        if self.anomaly.trend_window < 2 {
            return Err(ConfigError::Invalid(
                "anomaly.trend_window must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

/// Ten years.
const MAX_RETENTION_HOURS: u64 = 24 * 365 * 10;

fn non_zero(name: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
    }
    Ok(())
}

// ============================================================
// Sections
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub slow_threshold_ms: f64,
    pub very_slow_threshold_ms: f64,
    /// Distinct fingerprints kept before the oldest 10% are evicted.
    pub max_fingerprints: usize,
    /// Distinct tables tracked before the least recently used 10% are evicted.
    pub max_tables: usize,
    pub slow_log_capacity: usize,
    /// Row counts remembered per fingerprint.
    pub recent_rows_capacity: usize,
    /// Slow-log SQL is truncated to this many bytes.
    pub display_sql_max_len: usize,
    /// Bound parameters kept with a slow-log event.
    pub params_sample_len: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            slow_threshold_ms: 500.0,
            very_slow_threshold_ms: 2000.0,
            max_fingerprints: 5000,
            max_tables: 1000,
            slow_log_capacity: 1000,
            recent_rows_capacity: 100,
            display_sql_max_len: 500,
            params_sample_len: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_ms: u64,
    pub max_entries: usize,
    /// Period of the eager expiry sweep.
    pub sweep_interval_ms: u64,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 5 * 60 * 1000,
            max_entries: 1000,
            sweep_interval_ms: 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub sample_interval_secs: u64,
    pub history_len: usize,
    /// Critical alert when active connections exceed this fraction of max.
    pub saturation_ratio: f64,
}

impl PoolConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs.max(1))
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 10,
            history_len: 100,
            saturation_ratio: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub collection_interval_secs: u64,
    /// Trend points and alerts older than this are dropped by the sweep.
    pub retention_hours: u64,
    pub retention_sweep_secs: u64,
    /// Consecutive failures after which a collector is disabled.
    pub max_consecutive_failures: u32,
    pub alert_history_len: usize,
    pub trend_capacity: usize,
}

impl AggregatorConfig {
    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs.max(1))
    }

    /// Retention window, saturating at `TimeDelta::MAX` for unvalidated configs.
    pub fn retention(&self) -> chrono::Duration {
        i64::try_from(self.retention_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn retention_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_secs.max(1))
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            collection_interval_secs: 30,
            retention_hours: 24,
            retention_sweep_secs: 60 * 60,
            max_consecutive_failures: 5,
            alert_history_len: 100,
            trend_capacity: 100,
        }
    }
}

/// Thresholds shared by alert rules and the health score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    pub error_rate_warning_pct: f64,
    pub error_rate_critical_pct: f64,
    pub response_time_warning_ms: f64,
    pub response_time_critical_ms: f64,
    pub memory_warning_mb: f64,
    pub slow_query_warning_pct: f64,
    pub cache_hit_rate_min_pct: f64,
    /// Lookups required before a low cache hit rate is reported.
    pub cache_min_lookups: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            error_rate_warning_pct: 5.0,
            error_rate_critical_pct: 10.0,
            response_time_warning_ms: 1000.0,
            response_time_critical_ms: 2000.0,
            memory_warning_mb: 1000.0,
            slow_query_warning_pct: 20.0,
            cache_hit_rate_min_pct: 50.0,
            cache_min_lookups: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorThresholds {
    pub query_error_rate_pct: f64,
    pub slow_min_count: u64,
    pub cache_candidate_min_count: u64,
    pub cache_candidate_min_avg_ms: f64,
    pub complex_min_score: u8,
    pub complex_min_avg_ms: f64,
    pub table_slow_pct: f64,
    pub n_plus_one_min_fingerprints: usize,
    pub n_plus_one_min_count: u64,
    pub n_plus_one_max_avg_ms: f64,
    pub global_slow_pct: f64,
    pub global_error_pct: f64,
    pub pool_utilization_pct: f64,
    pub hot_table_slow_pct: f64,
    pub hot_table_limit: usize,
}

impl Default for AdvisorThresholds {
    fn default() -> Self {
        Self {
            query_error_rate_pct: 10.0,
            slow_min_count: 10,
            cache_candidate_min_count: 100,
            cache_candidate_min_avg_ms: 100.0,
            complex_min_score: 5,
            complex_min_avg_ms: 200.0,
            table_slow_pct: 20.0,
            n_plus_one_min_fingerprints: 50,
            n_plus_one_min_count: 50,
            n_plus_one_max_avg_ms: 50.0,
            global_slow_pct: 20.0,
            global_error_pct: 5.0,
            pool_utilization_pct: 80.0,
            hot_table_slow_pct: 30.0,
            hot_table_limit: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub spike_factor: f64,
    /// Points preceding the latest one that form the spike baseline.
    pub spike_window: usize,
    pub trend_window: usize,
    /// Share of deltas that must agree for a non-flat trend.
    pub trend_agreement: f64,
    pub latency_floor_ms: f64,
    pub memory_floor_mb: f64,
    pub error_rate_floor_pct: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            spike_factor: 2.0,
            spike_window: 5,
            trend_window: 10,
            trend_agreement: 0.7,
            latency_floor_ms: 1000.0,
            memory_floor_mb: 500.0,
            error_rate_floor_pct: 5.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_is_default() {
        let cfg = QueryLensConfig::from_json("{}").unwrap();
        assert_eq!(cfg.telemetry.slow_threshold_ms, 500.0);
        assert_eq!(cfg.telemetry.max_fingerprints, 5000);
        assert_eq!(cfg.cache.max_entries, 1000);
        assert_eq!(cfg.aggregator.retention_hours, 24);
    }

    #[test]
    fn test_partial_override() {
        let cfg = QueryLensConfig::from_json(
            r#"{"telemetry": {"slow_threshold_ms": 250}, "cache": {"max_entries": 10}}"#,
        )
        .unwrap();
        assert_eq!(cfg.telemetry.slow_threshold_ms, 250.0);
        assert_eq!(cfg.telemetry.very_slow_threshold_ms, 2000.0);
        assert_eq!(cfg.cache.max_entries, 10);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let err = QueryLensConfig::from_json(
            r#"{"telemetry": {"slow_threshold_ms": 3000, "very_slow_threshold_ms": 2000}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let err = QueryLensConfig::from_json(r#"{"cache": {"max_entries": 0}}"#).unwrap_err();
        assert!(err.to_string().contains("cache.max_entries"));
    }

    #[test]
    fn test_retention_bounds() {
        let err = QueryLensConfig::from_json(
            r#"{"aggregator": {"retention_hours": 1000000000000000}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("aggregator.retention_hours"));
        assert!(QueryLensConfig::from_json(r#"{"aggregator": {"retention_hours": 0}}"#).is_err());

        let huge = AggregatorConfig {
            retention_hours: u64::MAX,
            ..AggregatorConfig::default()
        };
        assert_eq!(huge.retention(), chrono::Duration::MAX);
        assert_eq!(AggregatorConfig::default().retention(), chrono::Duration::hours(24));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            QueryLensConfig::from_json("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
