//! Prometheus counters fed by queue events.

use crate::core::{QueueEvent, QueueHandle};
use crate::error::HiveResult;
use prometheus::{IntCounterVec, Opts, Registry, TextEncoder};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Job outcome counters.
#[derive(Debug, Clone)]
pub struct HiveMetrics {
    registry: Registry,
    jobs_total: IntCounterVec,
    queue_errors_total: IntCounterVec,
}

impl HiveMetrics {
    /// Create the counters and register them in a fresh registry.
    pub fn new() -> HiveResult<Self> {
        let registry = Registry::new();

        let jobs_total = IntCounterVec::new(
            Opts::new("hiveq_jobs_total", "Finished job attempts by outcome"),
            &["queue", "outcome"],
        )?;
        let queue_errors_total = IntCounterVec::new(
            Opts::new("hiveq_queue_errors_total", "Broker-level errors"),
            &["queue"],
        )?;

        registry.register(Box::new(jobs_total.clone()))?;
        registry.register(Box::new(queue_errors_total.clone()))?;

        Ok(Self {
            registry,
            jobs_total,
            queue_errors_total,
        })
    }

    /// Count one event for `queue`.
    pub fn record(&self, queue: &str, event: &QueueEvent) {
        match event {
            QueueEvent::Ready => {}
            QueueEvent::Error { .. } => self.queue_errors_total.with_label_values(&[queue]).inc(),
            QueueEvent::Succeeded { .. } => {
                self.jobs_total.with_label_values(&[queue, "succeeded"]).inc()
            }
            QueueEvent::Retrying { .. } => {
                self.jobs_total.with_label_values(&[queue, "retrying"]).inc()
            }
            QueueEvent::Failed { .. } => self.jobs_total.with_label_values(&[queue, "failed"]).inc(),
        }
    }

    /// Count every event emitted on `handle` from now on.
    pub fn track(&self, handle: &QueueHandle) -> JoinHandle<()> {
        let metrics = self.clone();
        let queue = handle.name().to_string();
        let mut events = handle.subscribe();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => metrics.record(&queue, &event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(queue = %queue, skipped, "Metrics fell behind queue events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Current value of `hiveq_jobs_total{queue, outcome}`.
    pub fn jobs(&self, queue: &str, outcome: &str) -> u64 {
        self.jobs_total.with_label_values(&[queue, outcome]).get()
    }

    /// Render all metrics in the text exposition format.
    pub fn gather(&self) -> HiveResult<String> {
        Ok(TextEncoder::new().encode_to_string(&self.registry.gather())?)
    }
}
