//! In-memory broker for hiveq.
//!
//! Jobs live in process memory. Every handle opened for the same queue name
//! through one [`MemoryBroker`] shares a single store, so a producer handle
//! and a worker handle see the same jobs, as they would with Redis.
//!
//! Time is read from `tokio::time`, so tests running with a paused clock
//! drive delays and backoff deterministically.

use super::{QueueBackend, QueueConnector, QueueStats};
use crate::config::QueueSettings;
use crate::error::{HiveError, HiveResult, SerializedError};
use crate::job::{FailureOutcome, Job, JobId, JobStatus};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Millisecond clock anchored at wall time, advanced by tokio's clock.
#[derive(Debug, Clone, Copy)]
struct Clock {
    anchor_ms: u64,
    anchor: Instant,
}

impl Clock {
    fn new() -> Self {
        Self {
            anchor_ms: crate::utils::now_millis(),
            anchor: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.anchor_ms + self.anchor.elapsed().as_millis() as u64
    }
}

/// Jobs and indexes for one queue name.
#[derive(Debug, Default)]
struct MemoryStore {
    /// Job records indexed by id
    jobs: HashMap<JobId, Job>,
    /// Ready jobs, FIFO
    waiting: VecDeque<JobId>,
    /// Scheduled jobs ordered by activation time
    delayed: BTreeSet<(u64, JobId)>,
    /// Claimed jobs with their stall deadline
    active: HashMap<JobId, u64>,
    /// Succeeded jobs that were kept
    succeeded: HashSet<JobId>,
    /// Failed jobs kept for inspection
    failed: Vec<JobId>,
    /// Last assigned id
    next_id: u64,
}

impl MemoryStore {
    /// Move delayed jobs whose time has come to the waiting list.
    fn activate_delayed(&mut self, now_ms: u64) {
        while let Some((at, _)) = self.delayed.first() {
            if *at > now_ms {
                break;
            }
            if let Some((_, id)) = self.delayed.pop_first() {
                self.waiting.push_back(id);
            }
        }
    }

    /// Put jobs whose claim expired back in front of the waiting list.
    fn requeue_stalled(&mut self, now_ms: u64) {
        let stalled: Vec<JobId> = self
            .active
            .iter()
            .filter(|(_, deadline)| **deadline <= now_ms)
            .map(|(id, _)| id.clone())
            .collect();

        for id in stalled {
            self.active.remove(&id);
            if let Some(job) = self.jobs.get_mut(&id) {
                match job.release_stalled() {
                    Ok(()) => {
                        tracing::warn!(job_id = %id, "Stalled job redelivered");
                        self.waiting.push_front(id);
                    }
                    Err(e) => tracing::error!(job_id = %id, error = %e, "Cannot redeliver job"),
                }
            }
        }
    }
}

/// In-memory broker; hands out [`InMemoryQueue`] backends.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    stores: Arc<Mutex<HashMap<String, Arc<Mutex<MemoryStore>>>>>,
    clock: Clock,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self {
            stores: Arc::new(Mutex::new(HashMap::new())),
            clock: Clock::new(),
        }
    }

    /// Open a backend for `name` directly.
    pub async fn queue(&self, name: &str, settings: QueueSettings) -> InMemoryQueue {
        let store = {
            let mut stores = self.stores.lock().await;
            Arc::clone(stores.entry(name.to_string()).or_default())
        };

        InMemoryQueue {
            name: name.to_string(),
            settings,
            store,
            clock: self.clock,
            closed: AtomicBool::new(false),
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueConnector for MemoryBroker {
    async fn connect(
        &self,
        name: &str,
        settings: &QueueSettings,
    ) -> HiveResult<Arc<dyn QueueBackend>> {
        Ok(Arc::new(self.queue(name, settings.clone()).await))
    }
}

/// In-memory queue backend bound to one queue name.
#[derive(Debug)]
pub struct InMemoryQueue {
    name: String,
    settings: QueueSettings,
    store: Arc<Mutex<MemoryStore>>,
    clock: Clock,
    closed: AtomicBool,
}

impl InMemoryQueue {
    /// Standalone queue with its own store.
    pub fn new(name: impl Into<String>, settings: QueueSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            store: Arc::new(Mutex::new(MemoryStore::default())),
            clock: Clock::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> HiveResult<()> {
        if self.is_closed() {
            return Err(HiveError::Closed {
                queue: self.name.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn save(&self, mut job: Job) -> HiveResult<Job> {
        self.ensure_open()?;
        job.data.validate()?;

        let now = self.clock.now_ms();
        let mut store = self.store.lock().await;

        store.next_id += 1;
        job.id = store.next_id.to_string();
        job.status = JobStatus::Created;
        job.stamp(now);

        match job.activate_at_ms {
            Some(at) if at > now => {
                store.delayed.insert((at, job.id.clone()));
            }
            _ => store.waiting.push_back(job.id.clone()),
        }
        store.jobs.insert(job.id.clone(), job.clone());

        tracing::debug!(queue = %self.name, job_id = %job.id, "Saved job");
        Ok(job)
    }

    async fn claim(&self) -> HiveResult<Option<Job>> {
        self.ensure_open()?;
        if !self.settings.is_worker {
            return Err(HiveError::queue_msg(format!(
                "Queue '{}' was not opened as a worker",
                self.name
            )));
        }

        let now = self.clock.now_ms();
        let mut store = self.store.lock().await;
        store.activate_delayed(now);
        store.requeue_stalled(now);

        while let Some(id) = store.waiting.pop_front() {
            let Some(job) = store.jobs.get_mut(&id) else {
                tracing::warn!(queue = %self.name, job_id = %id, "Skipping missing job");
                continue;
            };
            job.claim()?;
            let claimed = job.clone();
            store
                .active
                .insert(id, now.saturating_add(self.settings.stall_timeout_ms));
            return Ok(Some(claimed));
        }

        Ok(None)
    }

    async fn extend(&self, job: &Job) -> HiveResult<bool> {
        let deadline = self
            .clock
            .now_ms()
            .saturating_add(self.settings.stall_timeout_ms);
        let mut store = self.store.lock().await;
        match store.active.get_mut(&job.id) {
            Some(current) => {
                *current = deadline;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn complete(&self, job: &Job) -> HiveResult<()> {
        let mut store = self.store.lock().await;
        store.active.remove(&job.id);

        let stored = store
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| HiveError::JobNotFound { id: job.id.clone() })?;
        stored.complete()?;

        if self.settings.remove_on_success {
            store.jobs.remove(&job.id);
        } else {
            store.succeeded.insert(job.id.clone());
        }

        tracing::debug!(queue = %self.name, job_id = %job.id, "Job completed");
        Ok(())
    }

    async fn fail(&self, job: &Job, error: &SerializedError) -> HiveResult<FailureOutcome> {
        let now = self.clock.now_ms();
        let mut store = self.store.lock().await;
        store.active.remove(&job.id);

        let stored = store
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| HiveError::JobNotFound { id: job.id.clone() })?;
        let outcome = stored.record_failure(error.clone(), now)?;
        let activate_at = stored.activate_at_ms;

        match outcome {
            FailureOutcome::Retry { .. } => match activate_at {
                Some(at) if at > now => {
                    store.delayed.insert((at, job.id.clone()));
                }
                _ => store.waiting.push_back(job.id.clone()),
            },
            FailureOutcome::Exhausted => {
                if self.settings.remove_on_failure {
                    store.jobs.remove(&job.id);
                } else {
                    store.failed.push(job.id.clone());
                }
            }
        }

        Ok(outcome)
    }

    async fn get_job(&self, id: &JobId) -> HiveResult<Option<Job>> {
        let store = self.store.lock().await;
        Ok(store.jobs.get(id).cloned())
    }

    async fn stats(&self) -> HiveResult<QueueStats> {
        let store = self.store.lock().await;
        Ok(QueueStats {
            waiting: store.waiting.len() as u64,
            active: store.active.len() as u64,
            delayed: store.delayed.len() as u64,
            succeeded: store.succeeded.len() as u64,
            failed: store.failed.len() as u64,
        })
    }

    async fn health_check(&self) -> HiveResult<()> {
        self.ensure_open()
    }

    async fn close(&self) -> HiveResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        tracing::debug!(queue = %self.name, "In-memory queue closed");
        Ok(())
    }
}
