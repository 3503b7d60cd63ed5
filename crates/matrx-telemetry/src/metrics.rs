//! Prometheus metrics for the render protocol.
//!
//! All metrics follow the naming convention: `matrx_<side>_<metric>_<unit>`
//! where `<side>` is `client` (provision/publish/wait) or `worker` (request
//! consumer).

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

use crate::TelemetryError;

/// Latency buckets in seconds, 5 ms up to ~40 s.
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 40.0,
];

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // CLIENT METRICS
    // =========================================================================

    /// Reply queues provisioned (including idempotent re-provisioning)
    pub static ref REPLY_QUEUES_PROVISIONED: Counter = Counter::new(
        "matrx_client_reply_queues_provisioned_total",
        "Reply-queue provisioning calls that succeeded"
    ).expect("metric creation failed");

    /// Requests confirmed by the broker
    pub static ref REQUESTS_PUBLISHED: Counter = Counter::new(
        "matrx_client_requests_published_total",
        "Render requests confirmed by the broker"
    ).expect("metric creation failed");

    /// Publish failures by reason
    pub static ref PUBLISH_FAILURES: CounterVec = CounterVec::new(
        Opts::new("matrx_client_publish_failures_total", "Render requests not accepted"),
        &["reason"]  // reason: invalid/unroutable/nacked/transport
    ).expect("metric creation failed");

    /// Replies accepted by a waiter
    pub static ref REPLIES_MATCHED: Counter = Counter::new(
        "matrx_client_replies_matched_total",
        "Replies matched to a waiting request"
    ).expect("metric creation failed");

    /// Replies skipped by a waiter
    pub static ref REPLIES_REJECTED: CounterVec = CounterVec::new(
        Opts::new("matrx_client_replies_rejected_total", "Replies skipped while waiting"),
        &["reason"]  // reason: malformed/correlation_mismatch/missing_correlation
    ).expect("metric creation failed");

    /// Waits that hit their deadline
    pub static ref WAITS_TIMED_OUT: Counter = Counter::new(
        "matrx_client_waits_timed_out_total",
        "Reply waits that timed out"
    ).expect("metric creation failed");

    /// Waits cancelled by the caller
    pub static ref WAITS_CANCELLED: Counter = Counter::new(
        "matrx_client_waits_cancelled_total",
        "Reply waits cancelled by the caller"
    ).expect("metric creation failed");

    /// Time from subscription to matched reply
    pub static ref REPLY_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "matrx_client_reply_latency_seconds",
            "Time between starting a wait and receiving the matching reply"
        ).buckets(LATENCY_BUCKETS.to_vec())
    ).expect("metric creation failed");

    // =========================================================================
    // WORKER METRICS
    // =========================================================================

    /// Requests taken off the request queue
    pub static ref WORKER_REQUESTS_RECEIVED: Counter = Counter::new(
        "matrx_worker_requests_received_total",
        "Render requests delivered to the worker"
    ).expect("metric creation failed");

    /// Requests rejected before rendering
    pub static ref WORKER_REQUESTS_REJECTED: CounterVec = CounterVec::new(
        Opts::new("matrx_worker_requests_rejected_total", "Render requests rejected"),
        &["reason"]  // reason: decode/validation
    ).expect("metric creation failed");

    /// Render handler outcomes
    pub static ref WORKER_RENDERS: CounterVec = CounterVec::new(
        Opts::new("matrx_worker_renders_total", "Render handler invocations"),
        &["outcome"]  // outcome: success/failure
    ).expect("metric creation failed");

    /// Render handler duration
    pub static ref WORKER_RENDER_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "matrx_worker_render_duration_seconds",
            "Time spent in the render handler"
        ).buckets(LATENCY_BUCKETS.to_vec())
    ).expect("metric creation failed");

    /// Replies published by the worker
    pub static ref WORKER_REPLIES_PUBLISHED: CounterVec = CounterVec::new(
        Opts::new("matrx_worker_replies_published_total", "Replies published by the worker"),
        &["result"]  // result: confirmed/failed
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Client
        Box::new(REPLY_QUEUES_PROVISIONED.clone()),
        Box::new(REQUESTS_PUBLISHED.clone()),
        Box::new(PUBLISH_FAILURES.clone()),
        Box::new(REPLIES_MATCHED.clone()),
        Box::new(REPLIES_REJECTED.clone()),
        Box::new(WAITS_TIMED_OUT.clone()),
        Box::new(WAITS_CANCELLED.clone()),
        Box::new(REPLY_LATENCY.clone()),
        // Worker
        Box::new(WORKER_REQUESTS_RECEIVED.clone()),
        Box::new(WORKER_REQUESTS_REJECTED.clone()),
        Box::new(WORKER_RENDERS.clone()),
        Box::new(WORKER_RENDER_DURATION.clone()),
        Box::new(WORKER_REPLIES_PUBLISHED.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn gather_metrics() -> Result<String, TelemetryError> {
    register_metrics()?;
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::HistogramTimer::new(&$histogram)
    };
}
