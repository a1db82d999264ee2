//! Logging and metrics
//!
//! Logs go through `tracing`; `init_tracing` installs the subscriber once
//! per process. Metrics are pushed through the `MetricsSink` seam so the
//! aggregation core never depends on an exporter.

mod metrics;

pub use metrics::{AggregatorMetrics, MetricsSink, NoopMetrics, LATENCY_BUCKETS_MS};

use tracing_subscriber::EnvFilter;

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// `LOG_FORMAT=json` selects JSON, anything else plain text
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Install the global subscriber. Filter comes from `RUST_LOG`, default `info`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    init_tracing_with(LogFormat::from_env());
}

pub fn init_tracing_with(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
