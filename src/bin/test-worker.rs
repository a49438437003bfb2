//! Worker process for the smoke-test queue.
//!
//! Connects using `REDIS_URL` (or `REDIS_HOST`/`REDIS_PORT`), processes
//! `test-job` jobs one at a time, and closes every queue on SIGINT/SIGTERM.

use hiveq::core::lifecycle;
use hiveq::prelude::*;
use hiveq::telemetry::init_tracing;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

const PROCESSING_TIME: Duration = Duration::from_secs(2);

async fn process_test_job(job: Job) -> Result<(), HandlerError> {
    info!(job_id = %job.id, job_type = %job.job_type(), data = ?job.data.data, "Received test job");

    let KnownJob::Test(payload) = KnownJob::from_envelope(&job.data)?;
    info!(
        job_id = %job.id,
        message = %payload.message,
        requested_at = %payload.timestamp,
        "Processing test job"
    );

    tokio::time::sleep(PROCESSING_TIME).await;

    info!(job_id = %job.id, "Test job completed");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = HiveConfig::from_env();
    init_tracing(&config.logging);
    info!("Starting test worker");

    let queue = match JobQueue::redis(&config) {
        Ok(queue) => queue,
        Err(e) => {
            error!(error = %e, "Failed to start worker");
            TracingReporter.capture(
                &SerializedError::from_hive(&e),
                &ErrorContext::new().tag("context", "worker-startup"),
            );
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = queue
        .register_handler(TEST_JOB_QUEUE, process_test_job, DEFAULT_CONCURRENCY)
        .await
    {
        lifecycle::report_fatal(queue.registry(), &e, "worker-startup");
        return ExitCode::FAILURE;
    }

    info!(queue = TEST_JOB_QUEUE, "Test worker is ready and waiting for jobs");

    let code = queue.run_until_signal().await;
    if code == ExitCode::SUCCESS {
        info!("Worker shutdown complete");
    }
    code
}
