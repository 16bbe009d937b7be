//! Logging setup and pipeline counters

use crate::config::{LogFormat, TelemetryConfig};
use crate::types::PlanId;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Plans written to the queue by the bundle builder
pub const PLANS_ENQUEUED_TOTAL: &str = "dossier_plans_enqueued_total";
/// Plans whose artifacts were generated and signed
pub const GENERATION_SUCCESS_TOTAL: &str = "dossier_generation_success_total";
/// Plans marked failed after exhausting retries or on a fatal error
pub const GENERATION_FAILURE_TOTAL: &str = "dossier_generation_failure_total";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured filter. Returns `false` when a
/// subscriber was already installed (e.g. by a test harness).
pub fn init_tracing(config: &TelemetryConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };
    result.is_ok()
}

pub(crate) fn record_plan_enqueued(jurisdiction: &str) {
    metrics::counter!(PLANS_ENQUEUED_TOTAL, "jurisdiction" => jurisdiction.to_string()).increment(1);
}

pub(crate) fn record_generation_success(plan_id: &PlanId, jurisdiction: &str) {
    metrics::counter!(
        GENERATION_SUCCESS_TOTAL,
        "plan_id" => plan_id.to_string(),
        "jurisdiction" => jurisdiction.to_string()
    )
    .increment(1);
}

pub(crate) fn record_generation_failure(plan_id: &PlanId, jurisdiction: &str) {
    metrics::counter!(
        GENERATION_FAILURE_TOTAL,
        "plan_id" => plan_id.to_string(),
        "jurisdiction" => jurisdiction.to_string()
    )
    .increment(1);
}
