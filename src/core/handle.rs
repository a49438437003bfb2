//! Queue handles.
//!
//! A handle binds one queue name to one role. It owns the broker backend,
//! the processors registered on it, and a broadcast channel of
//! [`QueueEvent`]s that mirrors what happens to its jobs.

use crate::config::{QueueSettings, Role};
use crate::error::{HiveError, HiveResult, SerializedError};
use crate::job::JobId;
use crate::queue::QueueBackend;
use crate::report::{ErrorContext, ErrorReporter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

/// Something that happened on a queue handle.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// The worker handle is ready to process jobs
    Ready,
    /// Broker-level failure
    Error {
        /// What went wrong
        error: SerializedError,
    },
    /// A job's handler finished normally
    Succeeded {
        /// Job id
        job_id: JobId,
    },
    /// A job failed and will be tried again
    Retrying {
        /// Job id
        job_id: JobId,
        /// Attempts made so far
        attempts_made: u32,
        /// Backoff before the next attempt
        delay: Duration,
        /// Error from the failed attempt
        error: SerializedError,
    },
    /// A job failed with no attempts left
    Failed {
        /// Job id
        job_id: JobId,
        /// Job type
        job_type: String,
        /// Error from the last attempt
        error: SerializedError,
    },
}

/// A connection to one queue under one role.
pub struct QueueHandle {
    name: String,
    role: Role,
    settings: QueueSettings,
    backend: Arc<dyn QueueBackend>,
    reporter: Arc<dyn ErrorReporter>,
    instance_id: Uuid,
    shutdown_tx: watch::Sender<bool>,
    processors: Mutex<Vec<JoinHandle<()>>>,
    close_lock: Mutex<()>,
    closed: AtomicBool,
    events: broadcast::Sender<QueueEvent>,
}

impl std::fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueHandle")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("instance_id", &self.instance_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl QueueHandle {
    /// Wrap an opened backend.
    pub fn new(
        name: impl Into<String>,
        role: Role,
        settings: QueueSettings,
        backend: Arc<dyn QueueBackend>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            name: name.into(),
            role,
            settings,
            backend,
            reporter,
            instance_id: Uuid::new_v4(),
            shutdown_tx,
            processors: Mutex::new(Vec::new()),
            close_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            events,
        }
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role this handle was opened for.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Options applied to this handle.
    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Broker backend.
    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    /// Unique id of this handle instance.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Whether `close` has finished, backend included.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether `close` has started.
    pub fn is_closing(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Fail with [`HiveError::Closed`] once the handle starts closing.
    pub fn ensure_open(&self) -> HiveResult<()> {
        if self.is_closing() {
            return Err(HiveError::Closed {
                queue: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Receive every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Receiver flipped to `true` when the handle starts closing.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub(crate) async fn attach_processor(&self, processor: JoinHandle<()>) {
        self.processors.lock().await.push(processor);
    }

    /// Number of processors registered on this handle.
    pub async fn processor_count(&self) -> usize {
        self.processors.lock().await.len()
    }

    /// Log an event, forward errors to the reporter, and broadcast it.
    pub fn emit(&self, event: QueueEvent) {
        match (&event, self.role) {
            (QueueEvent::Ready, _) => {
                tracing::info!(queue = %self.name, role = %self.role, "Queue ready");
            }
            (QueueEvent::Error { error }, Role::Worker) => {
                tracing::error!(queue = %self.name, error = %error, "Queue error");
                self.reporter.capture(
                    error,
                    &ErrorContext::new()
                        .tag("queue", &self.name)
                        .tag("type", "queue-error"),
                );
            }
            (QueueEvent::Error { error }, Role::Producer) => {
                tracing::error!(queue = %self.name, error = %error, "Producer queue error");
                self.reporter.capture(
                    error,
                    &ErrorContext::new()
                        .tag("queue", &self.name)
                        .tag("type", "producer-queue-error"),
                );
            }
            (QueueEvent::Succeeded { job_id }, _) => {
                tracing::debug!(queue = %self.name, job_id = %job_id, "Job succeeded");
            }
            (
                QueueEvent::Retrying {
                    job_id,
                    attempts_made,
                    delay,
                    error,
                },
                _,
            ) => {
                tracing::warn!(
                    queue = %self.name,
                    job_id = %job_id,
                    attempts_made,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Job failed, retrying"
                );
            }
            (
                QueueEvent::Failed {
                    job_id,
                    job_type,
                    error,
                },
                _,
            ) => {
                tracing::error!(
                    queue = %self.name,
                    job_id = %job_id,
                    job_type = %job_type,
                    error = %error,
                    "Job failed after all retries"
                );
                self.reporter.capture(
                    error,
                    &ErrorContext::new()
                        .tag("queue", &self.name)
                        .tag("type", "job-failed")
                        .tag("queue_job_id", job_id)
                        .tag("job_type", job_type),
                );
            }
        }

        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Stop claiming, wait for in-flight jobs, then release the backend.
    ///
    /// If processors are still running after `shutdown_timeout_secs` this
    /// returns [`HiveError::Timeout`] and leaves the backend open; calling
    /// `close` again keeps waiting and finishes the job. Closing a closed
    /// handle is a no-op.
    pub async fn close(&self) -> HiveResult<()> {
        let _guard = self.close_lock.lock().await;
        if self.is_closed() {
            return Ok(());
        }

        self.shutdown_tx.send_replace(true);

        {
            let mut processors = self.processors.lock().await;
            if !processors.is_empty() {
                let timeout_secs = self.settings.shutdown_timeout_secs;
                let joined = timeout(
                    Duration::from_secs(timeout_secs),
                    futures::future::join_all(processors.iter_mut()),
                )
                .await;

                match joined {
                    Ok(results) => {
                        for result in results {
                            if let Err(e) = result {
                                tracing::error!(
                                    queue = %self.name,
                                    error = %e,
                                    "Processor ended abnormally"
                                );
                            }
                        }
                        processors.clear();
                    }
                    Err(_) => {
                        // Finished handles must not be polled again on retry.
                        processors.retain(|processor| !processor.is_finished());
                        tracing::warn!(
                            queue = %self.name,
                            remaining = processors.len(),
                            timeout_secs,
                            "Processors still running at shutdown timeout"
                        );
                        return Err(HiveError::Timeout { timeout_secs });
                    }
                }
            }
        }

        self.backend.close().await?;
        self.closed.store(true, Ordering::SeqCst);
        tracing::debug!(queue = %self.name, role = %self.role, "Queue closed");
        Ok(())
    }
}
