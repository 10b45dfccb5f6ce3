//! Bounded, non-blocking queue for count metrics
//!
//! Outputs enqueue count samples on their hot path with `try_send`. A single
//! [`MetricsWorker`] drains the queue into a [`CountSink`]. When the queue is
//! full (or the worker is gone) the sample is dropped and counted, so a slow
//! metrics backend never stalls delivery.

use super::Metrics;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};

/// One count increment with its category and tag list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountSample {
    pub category: &'static str,
    pub value: u64,
    pub tags: Vec<String>,
}

/// Destination for drained count samples
pub trait CountSink: Send + Sync {
    fn count(&self, sample: &CountSample);
}

/// Writes samples to the `sidekick_counts_total` Prometheus counter
pub struct PrometheusCountSink;

impl CountSink for PrometheusCountSink {
    fn count(&self, sample: &CountSample) {
        if let Some(m) = Metrics::get() {
            let tags = sample.tags.join(",");
            m.counts
                .with_label_values(&[sample.category, tags.as_str()])
                .inc_by(sample.value);
        }
    }
}

/// Producer side of the metrics queue
#[derive(Clone)]
pub struct MetricsQueue {
    tx: mpsc::Sender<CountSample>,
    enqueued: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

/// Consumer side of the metrics queue
pub struct MetricsWorker {
    rx: mpsc::Receiver<CountSample>,
}

impl MetricsQueue {
    /// Create a queue holding at most `capacity` pending samples
    ///
    /// # Panics
    /// Panics if `capacity` is zero (tokio channel requirement); config
    /// validation rejects zero before this is reached.
    pub fn new(capacity: usize) -> (MetricsQueue, MetricsWorker) {
        let (tx, rx) = mpsc::channel(capacity);
        let queue = MetricsQueue {
            tx,
            enqueued: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (queue, MetricsWorker { rx })
    }

    /// Enqueue a count sample without blocking
    pub fn count(&self, category: &'static str, value: u64, tags: &[&str]) {
        let sample = CountSample {
            category,
            value,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        };

        match self.tx.try_send(sample) {
            Ok(()) => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(sample)) | Err(TrySendError::Closed(sample)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(m) = Metrics::get() {
                    m.dropped.inc();
                }
                debug!(category = sample.category, "Metrics queue unavailable, sample dropped");
            }
        }
    }

    /// Samples accepted by the queue
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Samples dropped on overflow or after the worker stopped
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl MetricsWorker {
    /// Drain samples into `sink` until every queue handle is dropped
    pub async fn run(mut self, sink: Arc<dyn CountSink>) {
        let mut drained = 0u64;
        while let Some(sample) = self.rx.recv().await {
            sink.count(&sample);
            drained += 1;
        }
        info!(drained = drained, "Metrics worker stopped");
    }
}
