#![allow(dead_code)]

use async_trait::async_trait;
use hiveq::error::{HiveError, HiveResult, SerializedError};
use hiveq::job::{FailureOutcome, Job, JobId};
use hiveq::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Connector that counts how many backends were opened and closed.
#[derive(Clone, Default)]
pub struct CountingConnector {
    inner: MemoryBroker,
    pub connects: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
}

impl CountingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueConnector for CountingConnector {
    async fn connect(
        &self,
        name: &str,
        settings: &QueueSettings,
    ) -> HiveResult<Arc<dyn QueueBackend>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.connect(name, settings).await?;
        Ok(Arc::new(CountingQueue {
            inner,
            closes: Arc::clone(&self.closes),
        }))
    }
}

struct CountingQueue {
    inner: Arc<dyn QueueBackend>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl QueueBackend for CountingQueue {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn save(&self, job: Job) -> HiveResult<Job> {
        self.inner.save(job).await
    }

    async fn claim(&self) -> HiveResult<Option<Job>> {
        self.inner.claim().await
    }

    async fn extend(&self, job: &Job) -> HiveResult<bool> {
        self.inner.extend(job).await
    }

    async fn complete(&self, job: &Job) -> HiveResult<()> {
        self.inner.complete(job).await
    }

    async fn fail(&self, job: &Job, error: &SerializedError) -> HiveResult<FailureOutcome> {
        self.inner.fail(job, error).await
    }

    async fn get_job(&self, id: &JobId) -> HiveResult<Option<Job>> {
        self.inner.get_job(id).await
    }

    async fn stats(&self) -> HiveResult<QueueStats> {
        self.inner.stats().await
    }

    async fn health_check(&self) -> HiveResult<()> {
        self.inner.health_check().await
    }

    async fn close(&self) -> HiveResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await
    }
}

/// Connector whose broker is unreachable.
pub struct UnreachableConnector;

#[async_trait]
impl QueueConnector for UnreachableConnector {
    async fn connect(
        &self,
        _name: &str,
        _settings: &QueueSettings,
    ) -> HiveResult<Arc<dyn QueueBackend>> {
        Err(HiveError::queue_msg("Connection refused"))
    }
}
