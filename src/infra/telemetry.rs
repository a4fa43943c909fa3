use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

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

/// Register metric descriptions with the installed recorder, once per process.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "dispatch_cache_hit_total",
            Unit::Count,
            "Total number of queries served from the cache."
        );
        describe_counter!(
            "dispatch_cache_miss_total",
            Unit::Count,
            "Total number of cached queries that ran their handler."
        );
        describe_counter!(
            "dispatch_cache_store_evict_total",
            Unit::Count,
            "Total number of store entries evicted due to capacity."
        );
        describe_counter!(
            "dispatch_cache_store_expired_total",
            Unit::Count,
            "Total number of store entries dropped after expiring."
        );
        describe_counter!(
            "dispatch_cache_invalidated_total",
            Unit::Count,
            "Total number of cache entries removed by commands."
        );
        describe_counter!(
            "dispatch_cache_reload_total",
            Unit::Count,
            "Total number of auto-reloads started after invalidation."
        );
        describe_counter!(
            "dispatch_cache_reload_failed_total",
            Unit::Count,
            "Total number of auto-reloads that failed."
        );
        describe_counter!(
            "dispatch_cache_invalidation_failure_total",
            Unit::Count,
            "Total number of failed removes and reloads."
        );
        describe_gauge!(
            "dispatch_cache_event_queue_len",
            Unit::Count,
            "Current number of invalidation failure events in the queue."
        );
        describe_counter!(
            "dispatch_cache_event_dropped_total",
            Unit::Count,
            "Total number of invalidation failure events dropped due to queue overflow."
        );
        describe_histogram!(
            "dispatch_cache_invalidation_ms",
            Unit::Milliseconds,
            "Invalidation pass latency in milliseconds."
        );
    });
}
