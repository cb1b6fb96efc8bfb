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
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
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

/// Register descriptions for every metric the engine and client emit.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "relaycache_fetch_total",
            Unit::Count,
            "Total number of network fetches started by coordinators."
        );
        describe_counter!(
            "relaycache_fetch_error_total",
            Unit::Count,
            "Total number of fetches that failed and were reported to the caller."
        );
        describe_histogram!(
            "relaycache_fetch_ms",
            Unit::Milliseconds,
            "Fetch round-trip latency in milliseconds."
        );
        describe_counter!(
            "relaycache_commit_total",
            Unit::Count,
            "Total number of commits made under a subject's write lock."
        );
        describe_counter!(
            "relaycache_notify_suppressed_total",
            Unit::Count,
            "Total number of notifications dropped because the value was unchanged."
        );
        describe_counter!(
            "relaycache_admission_rejected_total",
            Unit::Count,
            "Total number of requests dropped because their id was still in flight."
        );
        describe_counter!(
            "relaycache_dispatch_duplicate_total",
            Unit::Count,
            "Total number of caller dispatches dropped because the id was already pending."
        );
        describe_counter!(
            "relaycache_task_swept_total",
            Unit::Count,
            "Total number of pending caller tasks evicted for exceeding the maximum age."
        );
    });
}
