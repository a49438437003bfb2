use hiveq::core::{EnqueueOptions, enqueue};
use hiveq::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn registry() -> QueueRegistry {
    QueueRegistry::new(Arc::new(MemoryBroker::new()), QueueSettings::default())
}

async fn stored_job(registry: &QueueRegistry, queue: &str, id: &JobId) -> Job {
    let handle = registry.get_or_create(queue, Role::Producer).await.unwrap();
    handle.backend().get_job(id).await.unwrap().unwrap()
}

#[tokio::test]
async fn default_retry_policy_is_four_retries_exponential() {
    let registry = registry();
    let envelope = JobEnvelope::from_value("report", json!({"month": 5})).unwrap();

    let id = enqueue(&registry, "reports", envelope, EnqueueOptions::default())
        .await
        .unwrap();
    let job = stored_job(&registry, "reports", &id).await;

    assert_eq!(job.options.retry.retries(), 4);
    assert_eq!(job.options.retry.max_attempts, 5);
    assert_eq!(job.options.retry.backoff, BackoffStrategy::Exponential);
    assert_eq!(job.options.retry.initial_delay_ms, 5000);
    assert_eq!(job.status, JobStatus::Created);
    assert_eq!(job.activate_at_ms, None);
}

#[tokio::test]
async fn explicit_retries_keep_exponential_backoff() {
    let registry = registry();
    let envelope = JobEnvelope::from_value("report", json!({})).unwrap();

    let id = enqueue(
        &registry,
        "reports",
        envelope,
        EnqueueOptions::default().with_retries(1),
    )
    .await
    .unwrap();
    let job = stored_job(&registry, "reports", &id).await;

    assert_eq!(job.options.retry.max_attempts, 2);
    assert_eq!(job.options.retry.backoff, BackoffStrategy::Exponential);
    assert_eq!(job.options.retry.initial_delay_ms, 5000);
}

#[tokio::test(start_paused = true)]
async fn delayed_job_activates_no_earlier_than_requested() {
    let registry = registry();
    let envelope = JobEnvelope::from_value("reminder", json!({"user": 7})).unwrap();

    let id = enqueue(
        &registry,
        "reminders",
        envelope,
        EnqueueOptions::default().with_delay_ms(10_000),
    )
    .await
    .unwrap();
    let job = stored_job(&registry, "reminders", &id).await;
    assert!(job.activate_at_ms.unwrap() >= job.timestamp_ms + 10_000);

    let worker = registry.get_or_create("reminders", Role::Worker).await.unwrap();
    assert!(worker.backend().claim().await.unwrap().is_none());

    tokio::time::advance(Duration::from_millis(10_000)).await;
    let claimed = assert_ok!(worker.backend().claim().await).unwrap();
    assert_eq!(claimed.id, id);
}

#[tokio::test]
async fn empty_type_or_queue_name_is_rejected() {
    let registry = registry();

    assert_err!(JobEnvelope::new("", serde_json::Map::new()));
    let untyped: JobEnvelope = serde_json::from_value(json!({"type": ""})).unwrap();
    assert_err!(enqueue(&registry, "reports", untyped, EnqueueOptions::default()).await);

    let envelope = JobEnvelope::from_value("report", json!({})).unwrap();
    let err = assert_err!(enqueue(&registry, "", envelope, EnqueueOptions::default()).await);
    assert!(matches!(err, HiveError::InvalidQueueName));
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn typed_jobs_use_their_type_tag() {
    let registry = registry();
    let job = KnownJob::Test(TestJobData {
        timestamp: chrono::Utc::now(),
        message: "smoke".to_string(),
    });

    let id = hiveq::core::enqueue_known(&registry, TEST_JOB_QUEUE, job, EnqueueOptions::default())
        .await
        .unwrap();
    let stored = stored_job(&registry, TEST_JOB_QUEUE, &id).await;

    assert_eq!(stored.job_type(), TEST_JOB_TYPE);
    assert_eq!(stored.data.get("message"), Some(&json!("smoke")));
}

#[tokio::test]
async fn ids_are_unique_per_queue() {
    let registry = registry();
    let mut ids = Vec::new();
    for n in 0..3 {
        let envelope = JobEnvelope::from_value("n", json!({"n": n})).unwrap();
        ids.push(
            enqueue(&registry, "numbers", envelope, EnqueueOptions::default())
                .await
                .unwrap(),
        );
    }
    ids.dedup();
    assert_eq!(ids.len(), 3);
}
