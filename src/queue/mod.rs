//! Queue brokers for hiveq.
//!
//! A broker persists jobs and implements claim/ack/retry bookkeeping:
//! - **In-Memory**: shared in-process store, used for tests and single-process setups
//! - **Redis**: durable and shared across processes
//!
//! Brokers are opened through a [`QueueConnector`], one backend per queue handle.

use crate::config::QueueSettings;
use crate::error::{HiveResult, SerializedError};
use crate::job::{FailureOutcome, Job, JobId};
use async_trait::async_trait;
use std::sync::Arc;

pub mod memory;
pub use memory::{InMemoryQueue, MemoryBroker};

#[cfg(feature = "redis-queue")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
pub mod redis;

#[cfg(feature = "redis-queue")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
pub use redis::{RedisConnector, RedisQueue};

/// Job counts per state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Jobs ready to be claimed
    pub waiting: u64,
    /// Jobs currently claimed
    pub active: u64,
    /// Jobs scheduled for later (delayed or backing off)
    pub delayed: u64,
    /// Succeeded jobs still stored
    pub succeeded: u64,
    /// Failed jobs kept for inspection
    pub failed: u64,
}

/// Contract every broker implements.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Name of the queue this backend is bound to
    fn name(&self) -> &str;

    /// Persist a new job and return it with its assigned id and timestamps
    async fn save(&self, job: Job) -> HiveResult<Job>;

    /// Claim the next job, if any.
    ///
    /// Due delayed jobs are activated and stalled claims are redelivered
    /// before popping. The returned job is `Active`.
    async fn claim(&self) -> HiveResult<Option<Job>>;

    /// Push back the stall deadline of a job this worker is still running.
    ///
    /// Returns `false` if the job is no longer claimed by anyone.
    async fn extend(&self, job: &Job) -> HiveResult<bool>;

    /// Acknowledge a successful run
    async fn complete(&self, job: &Job) -> HiveResult<()>;

    /// Record a failed run and apply the job's retry policy
    async fn fail(&self, job: &Job, error: &SerializedError) -> HiveResult<FailureOutcome>;

    /// Look a job up by id
    async fn get_job(&self, id: &JobId) -> HiveResult<Option<Job>>;

    /// Job counts
    async fn stats(&self) -> HiveResult<QueueStats>;

    /// Health check for the broker connection
    async fn health_check(&self) -> HiveResult<()>;

    /// Release the connection held by this backend
    async fn close(&self) -> HiveResult<()>;
}

/// Opens a backend for a queue name.
#[async_trait]
pub trait QueueConnector: Send + Sync {
    /// Open a backend bound to `name` with the given role options
    async fn connect(&self, name: &str, settings: &QueueSettings)
    -> HiveResult<Arc<dyn QueueBackend>>;
}
