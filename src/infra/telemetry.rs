//! Process-wide logging and metric descriptions for the binary.

use std::io::{self, IsTerminal};
use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, Registry, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{METRIC_DISPATCH_TOTAL, METRIC_FETCH_MS, METRIC_FETCH_TOTAL};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
///
/// Events go to stderr so stdout stays reserved for command output. `RUST_LOG`
/// refines the configured level.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    tracing_subscriber::registry()
        .with(output_layer(logging.format, io::stderr().is_terminal()))
        .with(env_filter(logging.level))
        .with(ErrorLayer::default())
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn env_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

fn output_layer(format: LogFormat, ansi: bool) -> BoxedLayer {
    match format {
        // Span fields carry the request hash from the fetch path.
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(io::stderr)
            .with_ansi(ansi)
            .with_target(false)
            .boxed(),
    }
}

/// Register units and help text for the metrics the cache emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_DISPATCH_TOTAL,
            Unit::Count,
            "Actions applied to the cache store, by action type."
        );
        describe_counter!(
            METRIC_FETCH_TOTAL,
            Unit::Count,
            "Fetches started by the orchestrator, by outcome (data, error, failed)."
        );
        describe_histogram!(
            METRIC_FETCH_MS,
            Unit::Milliseconds,
            "Time from a fetch starting to its settle action, by outcome."
        );
    });
}
