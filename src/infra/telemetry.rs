use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

/// Metric names emitted by the read path.
pub mod metric {
    pub const TRENDING_CACHE_HIT: &str = "alphafeed_trending_cache_hit_total";
    pub const TRENDING_CACHE_STALE: &str = "alphafeed_trending_cache_stale_total";
    pub const TRENDING_CACHE_MISS: &str = "alphafeed_trending_cache_miss_total";
    pub const TRENDING_COMPUTE_MS: &str = "alphafeed_trending_compute_ms";
    pub const REVALIDATION_STARTED: &str = "alphafeed_revalidation_started_total";
    pub const REVALIDATION_SKIPPED: &str = "alphafeed_revalidation_skipped_total";
    pub const REVALIDATION_FAILED: &str = "alphafeed_revalidation_failed_total";
    pub const ENRICHMENT_HIT: &str = "alphafeed_enrichment_hit_total";
    pub const ENRICHMENT_MISS: &str = "alphafeed_enrichment_miss_total";
    pub const ENRICHMENT_FAILURE: &str = "alphafeed_enrichment_failure_total";
}

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            metric::TRENDING_CACHE_HIT,
            Unit::Count,
            "Trending requests answered from a fresh cache entry."
        );
        describe_counter!(
            metric::TRENDING_CACHE_STALE,
            Unit::Count,
            "Trending requests answered from a stale entry while it is refreshed."
        );
        describe_counter!(
            metric::TRENDING_CACHE_MISS,
            Unit::Count,
            "Trending requests computed synchronously."
        );
        describe_histogram!(
            metric::TRENDING_COMPUTE_MS,
            Unit::Milliseconds,
            "Ranking computation latency in milliseconds."
        );
        describe_counter!(
            metric::REVALIDATION_STARTED,
            Unit::Count,
            "Background refreshes that acquired the revalidation lock."
        );
        describe_counter!(
            metric::REVALIDATION_SKIPPED,
            Unit::Count,
            "Refresh requests skipped because one was already running."
        );
        describe_counter!(
            metric::REVALIDATION_FAILED,
            Unit::Count,
            "Background refreshes whose computation failed."
        );
        describe_counter!(
            metric::ENRICHMENT_HIT,
            Unit::Count,
            "Market data lookups served from the per-address cache."
        );
        describe_counter!(
            metric::ENRICHMENT_MISS,
            Unit::Count,
            "Market data lookups sent to the provider."
        );
        describe_counter!(
            metric::ENRICHMENT_FAILURE,
            Unit::Count,
            "Market data lookups that failed and left the item unenriched."
        );
    });
}
