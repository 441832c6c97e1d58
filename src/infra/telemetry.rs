use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cascade::{
    METRIC_COMPLETE, METRIC_FLUSH_MS, METRIC_ITEMS_PROCESSED, METRIC_LOCK_POISONED,
    METRIC_QUEUE_LEN, METRIC_WRITES_SKIPPED,
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_ITEMS_PROCESSED,
            Unit::Count,
            "Queue items popped by the processor, labelled by outcome."
        );
        describe_histogram!(
            METRIC_FLUSH_MS,
            Unit::Milliseconds,
            "Invalidator flush latency in milliseconds, labelled by slug."
        );
        describe_gauge!(
            METRIC_QUEUE_LEN,
            Unit::Count,
            "Items in the persisted cascade after the last write or tick."
        );
        describe_counter!(
            METRIC_COMPLETE,
            Unit::Count,
            "Cascades that ran to completion."
        );
        describe_counter!(
            METRIC_WRITES_SKIPPED,
            Unit::Count,
            "Queue writes dropped, labelled by reason."
        );
        describe_counter!(
            METRIC_LOCK_POISONED,
            Unit::Count,
            "Poisoned locks recovered, labelled by source and lock kind."
        );
        describe_counter!(
            "object_cache_hit_total",
            Unit::Count,
            "Total number of object cache hits."
        );
        describe_counter!(
            "object_cache_miss_total",
            Unit::Count,
            "Total number of object cache misses."
        );
        describe_counter!(
            "object_cache_flush_total",
            Unit::Count,
            "Total number of full object cache flushes."
        );
    });
}
