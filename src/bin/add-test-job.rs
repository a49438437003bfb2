//! Enqueue one `test-job` and print its id.
//!
//! Usage: `add-test-job [message]`

use chrono::Utc;
use hiveq::prelude::*;
use hiveq::telemetry::init_tracing;
use std::process::ExitCode;

const DEFAULT_MESSAGE: &str = "Test job added";

async fn add_test_job(config: &HiveConfig, message: String) -> HiveResult<JobId> {
    let queue = JobQueue::redis(config)?;
    let job = KnownJob::Test(TestJobData {
        timestamp: Utc::now(),
        message,
    });

    let id = queue
        .enqueue_known(TEST_JOB_QUEUE, job, EnqueueOptions::default())
        .await?;
    queue.close_all().await?;
    Ok(id)
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = HiveConfig::from_env();
    init_tracing(&config.logging);

    let message = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_MESSAGE.to_string());

    match add_test_job(&config, message).await {
        Ok(id) => {
            println!("Test job added to queue (Job ID: {id})");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to add test job");
            ExitCode::FAILURE
        }
    }
}
