pub mod cache;
pub mod pool;
pub mod service;

use super::{Alert, AnalysisContext};

pub trait AlertRule: Send + Sync {
    fn id(&self) -> &'static str;
    fn evaluate(&self, ctx: &AnalysisContext) -> Vec<Alert>;
}

pub fn all_rules() -> Vec<Box<dyn AlertRule>> {
    vec![
        // Service level
        Box::new(service::ErrorRateRule),
        Box::new(service::ResponseTimeRule),
        Box::new(service::MemoryRule),
        Box::new(service::SlowQueriesRule),
        // Connection pool
        Box::new(pool::PoolRule),
        // Result cache
        Box::new(cache::CacheHitRateRule),
    ]
}
