use crate::analysis::rules::AlertRule;
use crate::analysis::{Alert, AnalysisContext};
use crate::pool::sample_alerts;

/// Waiting clients and near-saturation of the latest pool sample.
pub struct PoolRule;

impl AlertRule for PoolRule {
    fn id(&self) -> &'static str {
        "pool"
    }

    fn evaluate(&self, ctx: &AnalysisContext) -> Vec<Alert> {
        let Some(sample) = ctx.pool.and_then(|p| p.latest.as_ref()) else {
            return Vec::new();
        };
        sample_alerts(sample, ctx.saturation_ratio, ctx.timestamp)
    }
}
