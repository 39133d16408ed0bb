//! querylensd - query log replay and report tool.
//!
//! Reads a JSON-lines log of query executions and pool samples, feeds it
//! through the telemetry pipeline and prints one aggregated report.
//!
//! Accepted lines:
//! ```text
//! {"sql": "SELECT ...", "duration_ms": 12.5, "rows": 3, "params": [1]}
//! {"sql": "UPDATE ...", "duration_ms": 40, "error": "deadlock detected"}
//! {"pool": {"active": 8, "idle": 2, "waiting": 0, "max": 10}}
//! ```

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Returns unused pages to the OS once the log has been ingested.
fn release_memory_to_os() {
    // SAFETY: "arena.0.purge" takes no input or output arguments.
    unsafe {
        tikv_jemalloc_sys::mallctl(
            c"arena.0.purge".as_ptr().cast(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            0,
        );
    }
}

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use querylens_core::analysis::Severity;
use querylens_core::analysis::advisor::Priority;
use querylens_core::collector::{CollectError, builtin};
use querylens_core::config::ConfigError;
use querylens_core::fmt::{format_mb, format_ms, truncate};
use querylens_core::{
    AggregatedSnapshot, Aggregator, PoolMonitor, PoolSource, PoolStatus, QueryExecution,
    QueryLensConfig, QueryTelemetry,
};

/// Query log replay and report tool.
#[derive(Parser)]
#[command(name = "querylensd", about = "Replay a query log and report telemetry", version)]
struct Args {
    /// JSON-lines log to replay. Use "-" for stdin.
    input: PathBuf,

    /// JSON configuration file. Defaults are used when omitted.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the full snapshot as JSON instead of a text report.
    #[arg(long)]
    json: bool,

    /// Keep collecting every SECS seconds after the replay and print each
    /// new snapshot until interrupted.
    #[arg(short, long, value_name = "SECS")]
    interval: Option<u64>,

    /// Number of slow queries and recommendations listed in the text report.
    #[arg(long, default_value = "10")]
    top: usize,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is warn level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Error)]
enum ReplayError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("failed to read input: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["querylensd", "querylens_core"] {
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

// ============================================================
// Input
// ============================================================

#[derive(Debug, Deserialize, PartialEq)]
#[serde(untagged)]
enum LogLine {
    Pool { pool: PoolLine },
    Query(QueryLine),
}

#[derive(Debug, Deserialize, PartialEq)]
struct PoolLine {
    active: u32,
    idle: u32,
    #[serde(default)]
    waiting: u32,
    max: u32,
}

#[derive(Debug, Deserialize, PartialEq)]
struct QueryLine {
    sql: String,
    duration_ms: f64,
    #[serde(default)]
    rows: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    params: Vec<serde_json::Value>,
}

impl From<PoolLine> for PoolStatus {
    fn from(p: PoolLine) -> Self {
        PoolStatus {
            active: p.active,
            idle: p.idle,
            waiting: p.waiting,
            max: p.max,
        }
    }
}

/// Pool source backed by the most recent pool line of the log.
#[derive(Default)]
struct ReplayPool {
    status: Mutex<Option<PoolStatus>>,
}

impl ReplayPool {
    fn set(&self, status: PoolStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);
    }
}

impl PoolSource for ReplayPool {
    fn status(&self) -> Result<PoolStatus, CollectError> {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ok_or_else(|| CollectError::Unavailable("no pool line seen yet".to_string()))
    }
}

#[derive(Debug, Default, PartialEq)]
struct ReplayStats {
    queries: u64,
    pool_samples: u64,
    skipped: u64,
}

/// Feeds every line of `reader` into telemetry or the pool monitor.
/// Blank lines are ignored and malformed lines are counted and skipped.
fn replay<R: BufRead>(
    reader: R,
    telemetry: &QueryTelemetry,
    pool: &ReplayPool,
    monitor: &PoolMonitor,
) -> io::Result<ReplayStats> {
    let mut stats = ReplayStats::default();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<LogLine>(line) {
            Ok(LogLine::Query(q)) => {
                let mut exec = QueryExecution::new(&q.sql, q.duration_ms).params(&q.params);
                if let Some(rows) = q.rows {
                    exec = exec.rows(rows);
                }
                if let Some(err) = q.error.as_deref() {
                    exec = exec.error(err);
                }
                telemetry.record_query_execution(exec);
                stats.queries += 1;
            }
            Ok(LogLine::Pool { pool: p }) => {
                pool.set(p.into());
                if let Err(e) = monitor.sample_now() {
                    warn!(line = idx + 1, error = %e, "pool sample failed");
                }
                stats.pool_samples += 1;
            }
            Err(e) => {
                warn!(line = idx + 1, error = %e, "skipping malformed line");
                stats.skipped += 1;
            }
        }
    }

    Ok(stats)
}

fn open_input(path: &Path) -> io::Result<Box<dyn BufRead>> {
    if path.as_os_str() == "-" {
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }
}

// ============================================================
// Report
// ============================================================

fn severity_label(s: Severity) -> &'static str {
    match s {
        Severity::Info => "info",
        Severity::Warning => "warning",
        Severity::Critical => "critical",
    }
}

fn priority_label(p: Priority) -> &'static str {
    match p {
        Priority::Low => "low",
        Priority::Medium => "medium",
        Priority::High => "high",
    }
}

/// Renders the snapshot as a plain-text report.
fn render_report(snapshot: &AggregatedSnapshot, top: usize) -> String {
    let s = &snapshot.summary;
    let mut out = Vec::new();

    out.push(format!(
        "health: {} ({})",
        s.health.score,
        s.health.status.label()
    ));
    out.push(format!(
        "queries: {}  avg {}  errors {:.1}%  slow {:.1}%",
        s.total_queries,
        format_ms(s.avg_query_ms),
        s.error_rate_pct,
        s.slow_query_pct
    ));
    if let Some(u) = s.pool_utilization_pct {
        out.push(format!("pool: {u:.0}% utilized"));
    }
    if let Some(hit) = s.cache_hit_rate_pct {
        out.push(format!("cache: {hit:.1}% hit rate"));
    }
    if let Some(mb) = s.memory_mb {
        out.push(format!("memory: {}", format_mb(mb)));
    }

    if let Some(q) = &snapshot.performance.queries
        && !q.top_slow.is_empty()
    {
        out.push(String::new());
        out.push("slowest queries:".to_string());
        for (i, qs) in q.top_slow.iter().take(top).enumerate() {
            out.push(format!(
                "  {:>2}. {:>7} avg  x{:<5} {}",
                i + 1,
                format_ms(qs.avg_ms()),
                qs.count,
                truncate(&qs.pattern, 80)
            ));
        }
    }

    if !snapshot.alerts.is_empty() {
        out.push(String::new());
        out.push("alerts:".to_string());
        for a in &snapshot.alerts {
            out.push(format!("  [{}] {}", severity_label(a.severity), a.message));
        }
    }

    if !snapshot.recommendations.is_empty() {
        out.push(String::new());
        out.push("recommendations:".to_string());
        for r in snapshot.recommendations.iter().take(top) {
            out.push(format!("  [{}] {}", priority_label(r.priority), r.title));
        }
    }

    out.join("\n")
}

// ============================================================
// Main
// ============================================================

fn render(snapshot: &AggregatedSnapshot, args: &Args) -> Result<String, ReplayError> {
    if args.json {
        Ok(serde_json::to_string_pretty(snapshot)?)
    } else {
        Ok(render_report(snapshot, args.top))
    }
}

async fn run(args: &Args) -> Result<(), ReplayError> {
    let mut config = match &args.config {
        Some(path) => QueryLensConfig::load(path)?,
        None => QueryLensConfig::default(),
    };
    if let Some(secs) = args.interval {
        config.aggregator.collection_interval_secs = secs;
    }

    let telemetry = Arc::new(QueryTelemetry::new(&config));
    let pool = Arc::new(ReplayPool::default());
    let monitor = Arc::new(PoolMonitor::new(pool.clone(), config.pool.clone()));

    let stats = replay(open_input(&args.input)?, &telemetry, &pool, &monitor)?;
    info!(
        queries = stats.queries,
        pool_samples = stats.pool_samples,
        skipped = stats.skipped,
        "replay finished"
    );
    release_memory_to_os();

    let aggregator = Arc::new(Aggregator::new(config));
    aggregator.register_sync_collector(
        builtin::TELEMETRY,
        builtin::telemetry(telemetry.clone(), args.top),
    );
    if stats.pool_samples > 0 {
        aggregator.register_sync_collector(builtin::POOL, builtin::pool(monitor.clone()));
    }
    aggregator.register_sync_collector(builtin::PROCESS, builtin::process());

    if args.interval.is_none() {
        let snapshot = aggregator.run_cycle().await;
        debug!(cycle = snapshot.cycle, alerts = snapshot.alerts.len(), "snapshot built");
        println!("{}", render(&snapshot, args)?);
        return Ok(());
    }

    let mut updates = aggregator.subscribe();
    let task = aggregator.clone().spawn();
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                println!("{}\n", render(&snapshot, args)?);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }
    task.abort();
    Ok(())
}

fn main() {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);
    info!("querylensd {} starting", querylens_core::VERSION);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(&args)) {
        error!("{}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querylens_core::config::PoolConfig;
    use std::io::Cursor;

    fn setup() -> (Arc<QueryTelemetry>, Arc<ReplayPool>, PoolMonitor) {
        let telemetry = Arc::new(QueryTelemetry::new(&QueryLensConfig::default()));
        let pool = Arc::new(ReplayPool::default());
        let monitor = PoolMonitor::new(pool.clone(), PoolConfig::default());
        (telemetry, pool, monitor)
    }

    #[test]
    fn test_parse_lines() {
        let q: LogLine =
            serde_json::from_str(r#"{"sql":"SELECT 1","duration_ms":3,"rows":1}"#).unwrap();
        assert_eq!(
            q,
            LogLine::Query(QueryLine {
                sql: "SELECT 1".to_string(),
                duration_ms: 3.0,
                rows: Some(1),
                error: None,
                params: Vec::new(),
            })
        );

        let p: LogLine =
            serde_json::from_str(r#"{"pool":{"active":2,"idle":1,"max":4}}"#).unwrap();
        assert_eq!(
            p,
            LogLine::Pool {
                pool: PoolLine {
                    active: 2,
                    idle: 1,
                    waiting: 0,
                    max: 4,
                },
            }
        );

        assert!(serde_json::from_str::<LogLine>(r#"{"duration_ms":3}"#).is_err());
    }

    #[test]
    fn test_replay_counts_and_skips() {
        let (telemetry, pool, monitor) = setup();
        let input = concat!(
            "{\"sql\":\"SELECT * FROM users WHERE id = 1\",\"duration_ms\":12}\n",
            "\n",
            "{\"sql\":\"SELECT * FROM users WHERE id = 2\",\"duration_ms\":900,\"params\":[2]}\n",
            "not json\n",
            "{\"pool\":{\"active\":9,\"idle\":1,\"waiting\":3,\"max\":10}}\n",
            "{\"sql\":\"UPDATE users SET name = 'x'\",\"duration_ms\":5,\"error\":\"boom\"}\n",
        );

        let stats = replay(Cursor::new(input), &telemetry, &pool, &monitor).unwrap();
        assert_eq!(
            stats,
            ReplayStats {
                queries: 3,
                pool_samples: 1,
                skipped: 1,
            }
        );

        let totals = telemetry.totals();
        assert_eq!(totals.executions, 3);
        assert_eq!(totals.errors, 1);
        assert_eq!(totals.distinct_queries, 2);
        assert_eq!(telemetry.recent_slow_events(10).len(), 1);
        assert_eq!(monitor.latest().map(|s| s.waiting), Some(3));
    }

    #[test]
    fn test_pool_source_unavailable_before_first_line() {
        let pool = ReplayPool::default();
        assert!(matches!(pool.status(), Err(CollectError::Unavailable(_))));
        pool.set(PoolStatus {
            active: 1,
            idle: 0,
            waiting: 0,
            max: 2,
        });
        assert_eq!(pool.status().unwrap().max, 2);
    }

    #[tokio::test]
    async fn test_render_report() {
        let (telemetry, pool, monitor) = setup();
        let input = "{\"sql\":\"SELECT * FROM orders WHERE total > 10\",\"duration_ms\":2500}\n";
        replay(Cursor::new(input), &telemetry, &pool, &monitor).unwrap();

        let aggregator = Aggregator::new(QueryLensConfig::default());
        aggregator.register_sync_collector(builtin::TELEMETRY, builtin::telemetry(telemetry, 5));
        let snapshot = aggregator.run_cycle().await;

        let report = render_report(&snapshot, 5);
        assert!(report.starts_with("health: "));
        assert!(report.contains("queries: 1"));
        assert!(report.contains("slowest queries:"));
        assert!(report.contains("orders"));
        assert!(!report.contains("pool:"));
    }
}
