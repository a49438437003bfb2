//! Worker API.
//!
//! [`register_handler`] attaches a handler to the worker handle of a queue and
//! spawns a dispatcher for it. The dispatcher claims up to `concurrency` jobs
//! at a time, runs the handler for each, and reports the outcome back to the
//! broker, which applies the job's retry policy.
//!
//! A handler either returns `Ok(())` or an error. Panics count as errors.
//! Whether a failed job runs again depends only on its remaining attempts.

use super::handle::{QueueEvent, QueueHandle};
use super::registry::QueueRegistry;
use crate::config::Role;
use crate::error::{HandlerError, HiveError, HiveResult, SerializedError};
use crate::job::{FailureOutcome, Job};
use crate::utils::idle_backoff;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};

/// Concurrency used when the caller has no preference.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Processes claimed jobs.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Run one job
    async fn handle(&self, job: Job) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, job: Job) -> Result<(), HandlerError> {
        (self)(job).await
    }
}

/// Register `handler` for `queue_name` with at most `concurrency` jobs in flight.
pub async fn register_handler<H>(
    registry: &QueueRegistry,
    queue_name: &str,
    handler: H,
    concurrency: usize,
) -> HiveResult<Arc<QueueHandle>>
where
    H: JobHandler,
{
    if concurrency == 0 {
        return Err(HiveError::config("Concurrency must be greater than 0"));
    }

    let handle = registry.get_or_create(queue_name, Role::Worker).await?;
    handle.ensure_open()?;

    let dispatcher = tokio::spawn(run_dispatcher(
        Arc::clone(&handle),
        Arc::new(handler),
        concurrency,
    ));
    handle.attach_processor(dispatcher).await;

    tracing::info!(queue = queue_name, concurrency, "Job processor registered");
    Ok(handle)
}

/// Claim and process jobs until the handle starts closing, then drain.
async fn run_dispatcher(handle: Arc<QueueHandle>, handler: Arc<dyn JobHandler>, concurrency: usize) {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut in_flight: JoinSet<()> = JoinSet::new();
    let mut shutdown = handle.shutdown_receiver();
    let base_ms = handle.settings().poll_interval_ms;
    let max_ms = handle.settings().max_poll_interval_ms;
    let mut empty_polls = 0u32;

    tracing::debug!(queue = %handle.name(), concurrency, "Dispatcher started");

    loop {
        while let Some(result) = in_flight.try_join_next() {
            if let Err(e) = result {
                tracing::error!(queue = %handle.name(), error = %e, "Job task ended abnormally");
            }
        }

        if *shutdown.borrow() {
            break;
        }

        let permit = tokio::select! {
            _ = shutdown.changed() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let idle_ms = match handle.backend().claim().await {
            Ok(Some(job)) => {
                empty_polls = 0;
                let handle = Arc::clone(&handle);
                let handler = Arc::clone(&handler);
                in_flight.spawn(async move {
                    process_job(&handle, handler, job).await;
                    drop(permit);
                });
                continue;
            }
            Ok(None) => {
                empty_polls = empty_polls.saturating_add(1);
                idle_backoff(empty_polls, base_ms, max_ms)
            }
            Err(e) => {
                handle.emit(QueueEvent::Error {
                    error: SerializedError::from_hive(&e),
                });
                max_ms
            }
        };
        drop(permit);

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(Duration::from_millis(idle_ms)) => {}
        }
    }

    if !in_flight.is_empty() {
        tracing::info!(
            queue = %handle.name(),
            in_flight = in_flight.len(),
            "Waiting for in-flight jobs"
        );
    }
    while let Some(result) = in_flight.join_next().await {
        if let Err(e) = result {
            tracing::error!(queue = %handle.name(), error = %e, "Job task ended abnormally");
        }
    }

    tracing::debug!(queue = %handle.name(), "Dispatcher stopped");
}

/// Run the handler for one claimed job and record the outcome.
async fn process_job(handle: &QueueHandle, handler: Arc<dyn JobHandler>, job: Job) {
    let job_id = job.id.clone();
    tracing::debug!(
        queue = %handle.name(),
        job_id = %job_id,
        job_type = %job.job_type(),
        attempt = job.attempts_made,
        "Processing job"
    );

    let input = job.clone();
    let mut run = tokio::spawn(async move { handler.handle(input).await });

    // Keep the claim alive while the handler runs.
    let lease = Duration::from_millis((handle.settings().stall_timeout_ms / 2).max(1));
    let mut renew = interval_at(Instant::now() + lease, lease);
    renew.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let joined = loop {
        tokio::select! {
            joined = &mut run => break joined,
            _ = renew.tick() => match handle.backend().extend(&job).await {
                Ok(true) => {}
                Ok(false) => tracing::warn!(
                    queue = %handle.name(),
                    job_id = %job_id,
                    "Job lease lost while handler is running"
                ),
                Err(e) => tracing::warn!(
                    queue = %handle.name(),
                    job_id = %job_id,
                    error = %e,
                    "Failed to renew job lease"
                ),
            },
        }
    };

    let result = match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SerializedError::from(&e)),
        Err(join_error) => Err(SerializedError::message(
            "Panic",
            format!("Job handler panicked: {join_error}"),
        )),
    };

    let event = match result {
        Ok(()) => match handle.backend().complete(&job).await {
            Ok(()) => QueueEvent::Succeeded { job_id },
            Err(e) => QueueEvent::Error {
                error: SerializedError::from_hive(&e),
            },
        },
        Err(error) => match handle.backend().fail(&job, &error).await {
            Ok(FailureOutcome::Retry { delay }) => QueueEvent::Retrying {
                job_id,
                attempts_made: job.attempts_made,
                delay,
                error,
            },
            Ok(FailureOutcome::Exhausted) => QueueEvent::Failed {
                job_id,
                job_type: job.job_type().to_string(),
                error,
            },
            Err(e) => QueueEvent::Error {
                error: SerializedError::from_hive(&e),
            },
        },
    };

    handle.emit(event);
}
