//! Prometheus metrics for the sidekick gateway

mod queue;

pub use queue::{CountSample, CountSink, MetricsQueue, MetricsWorker, PrometheusCountSink};

use crate::error::{GatewayError, Result};
use prometheus::{
    Encoder, IntCounter, IntCounterVec, TextEncoder, register_int_counter,
    register_int_counter_vec,
};
use parking_lot::Mutex;
use std::sync::OnceLock;

/// Category used for per-output delivery counts
pub const OUTPUTS: &str = "outputs";

/// Global metrics instance
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Serializes registration so concurrent `init` calls register only once
static INIT_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// All gateway metrics
pub struct Metrics {
    /// Deliveries per output (by destination, status)
    pub outputs: IntCounterVec,

    /// Count samples drained from the metrics queue (by category, tags)
    pub counts: IntCounterVec,

    /// Count samples dropped because the queue was full or closed
    pub dropped: IntCounter,

    /// Events received by the ingest server
    pub events_received: IntCounter,
}

impl Metrics {
    /// Initialize metrics (call once at startup)
    ///
    /// Safe to call more than once and from several threads; later calls
    /// return the instance registered by the first one.
    ///
    /// Returns error if metric registration fails.
    pub fn init() -> Result<&'static Metrics> {
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let _guard = INIT_LOCK.lock();
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let metrics = Metrics {
            outputs: register_int_counter_vec!(
                "sidekick_outputs_total",
                "Events delivered to outputs",
                &["destination", "status"]
            )
            .map_err(|e| GatewayError::Metrics(format!("outputs: {e}")))?,

            counts: register_int_counter_vec!(
                "sidekick_counts_total",
                "Count samples emitted by outputs",
                &["category", "tags"]
            )
            .map_err(|e| GatewayError::Metrics(format!("counts: {e}")))?,

            dropped: register_int_counter!(
                "sidekick_metrics_dropped_total",
                "Count samples dropped by the metrics queue"
            )
            .map_err(|e| GatewayError::Metrics(format!("dropped: {e}")))?,

            events_received: register_int_counter!(
                "sidekick_events_received_total",
                "Events received by the ingest server"
            )
            .map_err(|e| GatewayError::Metrics(format!("events_received: {e}")))?,
        };

        let _ = METRICS.set(metrics);

        METRICS
            .get()
            .ok_or_else(|| GatewayError::Metrics("Failed to initialize metrics".to_string()))
    }

    /// Get the global metrics instance
    ///
    /// Returns None if metrics haven't been initialized yet.
    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
    }

    /// Record one delivery outcome for an output
    pub fn record_output(&self, destination: &str, status: &str) {
        self.outputs.with_label_values(&[destination, status]).inc();
    }
}

/// Gather all metrics and encode as Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        String::from_utf8(buffer).unwrap_or_default()
    } else {
        String::new()
    }
}

/// Record an output delivery if metrics are initialized, otherwise skip
pub fn try_record_output(destination: &str, status: &str) {
    if let Some(m) = Metrics::get() {
        m.record_output(destination, status);
    }
}

/// Record a received event if metrics are initialized, otherwise skip
pub fn try_record_received() {
    if let Some(m) = Metrics::get() {
        m.events_received.inc();
    }
}
