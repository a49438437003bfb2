//! # hiveq
//!
//! A small async job queue on top of Redis.
//!
//! ## Features
//!
//! - **Role-separated handles**: one producer and one worker handle per queue name, cached in a registry
//! - **At-least-once delivery**: claimed jobs that stall are redelivered
//! - **Bounded retries**: per-job attempt limits with exponential backoff
//! - **Delayed jobs**: jobs can be scheduled to activate later
//! - **Graceful shutdown**: in-flight jobs finish before queues close
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hiveq::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> HiveResult<()> {
//!     let config = HiveConfig::from_env();
//!     let queue = JobQueue::redis(&config)?;
//!
//!     queue
//!         .register_handler("emails", |job: Job| async move {
//!             println!("processing {} ({})", job.id, job.job_type());
//!             Ok::<(), HandlerError>(())
//!         }, DEFAULT_CONCURRENCY)
//!         .await?;
//!
//!     let envelope = JobEnvelope::from_value("send-email", json!({"to": "user@example.com"}))?;
//!     queue.enqueue("emails", envelope, EnqueueOptions::default()).await?;
//!
//!     queue.run_until_signal().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod job;
pub mod queue;
pub mod report;
pub mod telemetry;
pub mod utils;

#[cfg(feature = "metrics")]
#[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
pub mod metrics;

pub mod prelude {
    pub use crate::config::{
        BackoffStrategy, ConnectionConfig, HiveConfig, LogLevel, LoggingConfig, QueueSettings,
        RetryPolicy, Role,
    };
    pub use crate::core::{
        DEFAULT_CONCURRENCY, EnqueueOptions, JobHandler, JobQueue, QueueEvent, QueueHandle,
        QueueRegistry,
    };
    pub use crate::error::{HandlerError, HiveError, HiveResult, SerializedError};
    pub use crate::job::{
        Job, JobEnvelope, JobId, JobOptions, JobStatus, KnownJob, TEST_JOB_QUEUE, TEST_JOB_TYPE,
        TestJobData,
    };
    pub use crate::queue::{MemoryBroker, QueueBackend, QueueConnector, QueueStats};
    pub use crate::report::{ErrorContext, ErrorReporter, TracingReporter};
    pub use async_trait::async_trait;

    #[cfg(feature = "redis-queue")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
    pub use crate::queue::RedisConnector;

    #[cfg(feature = "metrics")]
    #[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
    pub use crate::metrics::HiveMetrics;
}

pub use crate::config::{HiveConfig, QueueSettings, RetryPolicy, Role};
pub use crate::core::{JobQueue, QueueRegistry};
pub use crate::error::{HiveError, HiveResult};
pub use crate::job::{Job, JobEnvelope, JobId};
