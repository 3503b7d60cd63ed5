//! # MATRX Telemetry
//!
//! Structured logging and Prometheus metrics shared by the render client,
//! the render worker and the CLI.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use matrx_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_telemetry(&TelemetryConfig::from_env())?;
//!     // tracing macros and metrics are live from here on
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MATRX_SERVICE_NAME` | `matrx` | Service name in the startup log |
//! | `MATRX_LOG_LEVEL` / `LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `MATRX_JSON_LOGS` | `false` (`true` in containers) | JSON log lines |
//! | `MATRX_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

mod config;
mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{
    gather_metrics, register_metrics, HistogramTimer, PUBLISH_FAILURES, REGISTRY,
    REPLIES_MATCHED, REPLIES_REJECTED, REPLY_LATENCY, REPLY_QUEUES_PROVISIONED,
    REQUESTS_PUBLISHED, WAITS_CANCELLED, WAITS_TIMED_OUT, WORKER_RENDERS,
    WORKER_RENDER_DURATION, WORKER_REPLIES_PUBLISHED, WORKER_REQUESTS_RECEIVED,
    WORKER_REQUESTS_REJECTED,
};
pub use tracing_setup::{env_filter, init_tracing};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Register metrics and install the global tracing subscriber.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    // Initialize metrics first (synchronous)
    register_metrics()?;
    init_tracing(config)
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}

/// Convenience macro for recording a metric with a value.
#[macro_export]
macro_rules! metric_observe {
    ($metric:expr, $value:expr) => {
        $metric.observe($value)
    };
    ($metric:expr, $labels:expr, $value:expr) => {
        $metric.with_label_values($labels).observe($value)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_macros() {
        let before = PUBLISH_FAILURES.with_label_values(&["unroutable"]).get();
        metric_inc!(PUBLISH_FAILURES, &["unroutable"]);
        assert!(PUBLISH_FAILURES.with_label_values(&["unroutable"]).get() > before);

        metric_observe!(REPLY_LATENCY, 0.2);
        assert!(REPLY_LATENCY.get_sample_count() >= 1);
    }
}
