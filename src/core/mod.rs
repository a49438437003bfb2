//! The queue layer: handles, registry, producer and worker APIs, shutdown.
//!
//! [`JobQueue`] bundles a [`QueueRegistry`] with the free functions in the
//! submodules for applications that want a single entry point.

use crate::config::{QueueSettings, Role};
use crate::error::{HiveError, HiveResult};
use crate::job::{JobEnvelope, JobId, KnownJob};
use crate::queue::{MemoryBroker, QueueConnector, QueueStats};
use crate::report::ErrorReporter;
use std::process::ExitCode;
use std::sync::Arc;

pub mod handle;
pub mod lifecycle;
pub mod producer;
pub mod registry;
pub mod worker;

pub use handle::{QueueEvent, QueueHandle};
pub use lifecycle::{run_until_signal, shutdown_signal};
pub use producer::{EnqueueOptions, enqueue, enqueue_known};
pub use registry::{QueueRegistry, registry_key};
pub use worker::{DEFAULT_CONCURRENCY, JobHandler, register_handler};

/// Application-facing entry point.
///
/// # Examples
///
/// ```rust
/// use hiveq::prelude::*;
/// use serde_json::json;
///
/// # async fn example() -> HiveResult<()> {
/// let queue = JobQueue::in_memory(QueueSettings::default());
///
/// queue
///     .register_handler("emails", |job: Job| async move {
///         println!("sending {}", job.id);
///         Ok::<(), HandlerError>(())
///     }, 1)
///     .await?;
///
/// let envelope = JobEnvelope::from_value("send-email", json!({"to": "a@b.c"}))?;
/// let id = queue.enqueue("emails", envelope, EnqueueOptions::default()).await?;
/// println!("enqueued {id}");
///
/// queue.close_all().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct JobQueue {
    registry: Arc<QueueRegistry>,
}

impl JobQueue {
    /// Wrap an existing registry.
    pub fn new(registry: QueueRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Queue backed by an in-process broker.
    pub fn in_memory(settings: QueueSettings) -> Self {
        Self::with_connector(Arc::new(MemoryBroker::new()), settings)
    }

    /// Queue backed by any connector.
    pub fn with_connector(connector: Arc<dyn QueueConnector>, settings: QueueSettings) -> Self {
        Self::new(QueueRegistry::new(connector, settings))
    }

    /// Queue backed by Redis, using `config.connection`.
    ///
    /// The configuration is validated first. No connection is opened until
    /// a queue is first used.
    #[cfg(feature = "redis-queue")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
    pub fn redis(config: &crate::config::HiveConfig) -> HiveResult<Self> {
        config
            .validate()
            .map_err(|errors| HiveError::config(errors.join("; ")))?;
        let connector = crate::queue::RedisConnector::new(&config.connection)?;
        Ok(Self::with_connector(Arc::new(connector), config.queue.clone()))
    }

    /// Use a custom error reporter.
    ///
    /// Fails if the queue has already been cloned.
    pub fn with_reporter(self, reporter: Arc<dyn ErrorReporter>) -> HiveResult<Self> {
        Arc::try_unwrap(self.registry)
            .map(|registry| Self::new(registry.with_reporter(reporter)))
            .map_err(|_| {
                HiveError::config("Reporter must be set before the queue is cloned")
            })
    }

    /// The underlying registry.
    pub fn registry(&self) -> &QueueRegistry {
        &self.registry
    }

    /// Submit a job. See [`producer::enqueue`].
    pub async fn enqueue(
        &self,
        queue_name: &str,
        envelope: JobEnvelope,
        options: EnqueueOptions,
    ) -> HiveResult<JobId> {
        producer::enqueue(&self.registry, queue_name, envelope, options).await
    }

    /// Submit a typed job.
    pub async fn enqueue_known(
        &self,
        queue_name: &str,
        job: KnownJob,
        options: EnqueueOptions,
    ) -> HiveResult<JobId> {
        producer::enqueue_known(&self.registry, queue_name, job, options).await
    }

    /// Register a handler. See [`worker::register_handler`].
    pub async fn register_handler<H: JobHandler>(
        &self,
        queue_name: &str,
        handler: H,
        concurrency: usize,
    ) -> HiveResult<Arc<QueueHandle>> {
        worker::register_handler(&self.registry, queue_name, handler, concurrency).await
    }

    /// Job counts for a queue, through its producer handle.
    pub async fn stats(&self, queue_name: &str) -> HiveResult<QueueStats> {
        let handle = self.registry.get_or_create(queue_name, Role::Producer).await?;
        handle.backend().stats().await
    }

    /// Close every handle.
    pub async fn close_all(&self) -> HiveResult<()> {
        self.registry.close_all().await
    }

    /// Wait for SIGINT/SIGTERM, close everything, and return the exit code.
    pub async fn run_until_signal(&self) -> ExitCode {
        lifecycle::run_until_signal(&self.registry).await
    }
}
