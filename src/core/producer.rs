//! Producer API.

use super::handle::QueueEvent;
use super::registry::QueueRegistry;
use crate::config::{DEFAULT_RETRIES, RetryPolicy, Role};
use crate::error::{HiveResult, SerializedError};
use crate::job::{Job, JobEnvelope, JobId, JobOptions, KnownJob};

/// Per-call enqueue options.
///
/// Backoff is always exponential starting at the default delay; only the
/// retry count and the initial delay before activation can be chosen here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Retries after the first attempt; defaults to 4
    pub retries: Option<u32>,
    /// Don't activate before submission time plus this many milliseconds
    pub delay_ms: Option<u64>,
}

impl EnqueueOptions {
    /// Set the retry count.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Set the activation delay.
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    fn into_job_options(self) -> JobOptions {
        JobOptions {
            retry: RetryPolicy::from_retries(self.retries.unwrap_or(DEFAULT_RETRIES)),
            delay_ms: self.delay_ms,
        }
    }
}

/// Submit `envelope` to `queue_name` and return the broker-assigned id.
///
/// Broker failures are reported on the producer handle and returned.
pub async fn enqueue(
    registry: &QueueRegistry,
    queue_name: &str,
    envelope: JobEnvelope,
    options: EnqueueOptions,
) -> HiveResult<JobId> {
    envelope.validate()?;
    let handle = registry.get_or_create(queue_name, Role::Producer).await?;
    handle.ensure_open()?;

    let job = Job::new(envelope, options.into_job_options());
    match handle.backend().save(job).await {
        Ok(saved) => {
            tracing::info!(
                queue = queue_name,
                job_id = %saved.id,
                job_type = %saved.job_type(),
                "Job enqueued"
            );
            Ok(saved.id)
        }
        Err(e) => {
            handle.emit(QueueEvent::Error {
                error: SerializedError::from_hive(&e),
            });
            Err(e)
        }
    }
}

/// Submit a typed job.
pub async fn enqueue_known(
    registry: &QueueRegistry,
    queue_name: &str,
    job: KnownJob,
    options: EnqueueOptions,
) -> HiveResult<JobId> {
    enqueue(registry, queue_name, job.into_envelope()?, options).await
}
