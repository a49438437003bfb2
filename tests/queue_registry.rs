mod common;

use common::{CountingConnector, UnreachableConnector};
use hiveq::core::{EnqueueOptions, enqueue, register_handler};
use hiveq::prelude::*;
use hiveq::report::RecordingReporter;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn registry_with(connector: &CountingConnector) -> QueueRegistry {
    QueueRegistry::new(Arc::new(connector.clone()), QueueSettings::default())
}

#[tokio::test]
async fn same_name_and_role_returns_same_handle() {
    let connector = CountingConnector::new();
    let registry = registry_with(&connector);

    for role in [Role::Worker, Role::Producer] {
        let first = registry.get_or_create("reports", role).await.unwrap();
        let second = registry.get_or_create("reports", role).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    assert_eq!(connector.connects(), 2);
    assert_eq!(registry.len().await, 2);
}

#[tokio::test]
async fn producer_and_worker_never_share_a_handle() {
    let connector = CountingConnector::new();
    let registry = registry_with(&connector);

    let worker = registry.get_or_create("reports", Role::Worker).await.unwrap();
    let producer = registry.get_or_create("reports", Role::Producer).await.unwrap();

    assert!(!Arc::ptr_eq(&worker, &producer));
    assert_ne!(worker.instance_id(), producer.instance_id());
    assert_eq!(worker.role(), Role::Worker);
    assert_eq!(producer.role(), Role::Producer);
}

#[tokio::test]
async fn concurrent_requests_open_one_handle() {
    let connector = CountingConnector::new();
    let registry = Arc::new(registry_with(&connector));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.get_or_create("burst", Role::Worker).await })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }

    assert_eq!(connector.connects(), 1);
    assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[tokio::test]
async fn close_all_closes_every_handle_and_empties_registry() {
    let connector = CountingConnector::new();
    let registry = registry_with(&connector);

    registry.get_or_create("first", Role::Worker).await.unwrap();
    registry.get_or_create("second", Role::Worker).await.unwrap();
    registry.get_or_create("first", Role::Producer).await.unwrap();
    assert_eq!(registry.len().await, 3);

    registry.close_all().await.unwrap();

    assert_eq!(connector.closes(), 3);
    assert!(registry.is_empty().await);

    registry.get_or_create("first", Role::Worker).await.unwrap();
    assert_eq!(connector.connects(), 4);
}

#[tokio::test]
async fn unreachable_broker_propagates_and_is_reported() {
    let reporter = RecordingReporter::new();
    let registry = QueueRegistry::new(Arc::new(UnreachableConnector), QueueSettings::default())
        .with_reporter(Arc::new(reporter.clone()));

    let envelope = JobEnvelope::from_value("ping", json!({})).unwrap();
    let result = enqueue(&registry, "pings", envelope, EnqueueOptions::default()).await;

    assert!(matches!(result, Err(HiveError::Queue { .. })));
    assert!(registry.is_empty().await);

    let captured = reporter.captured();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].1.get("queue"), Some("pings"));
    assert_eq!(captured[0].1.get("type"), Some("producer-queue-error"));
}

#[tokio::test(start_paused = true)]
async fn close_all_after_timeout_closes_the_rest_on_retry() {
    let connector = CountingConnector::new();
    let registry = QueueRegistry::new(
        Arc::new(connector.clone()),
        QueueSettings::default()
            .with_poll_interval(10)
            .with_shutdown_timeout(1),
    );
    let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();

    let worker = register_handler(
        &registry,
        "slow",
        move |_job: Job| {
            let started_tx = started_tx.clone();
            async move {
                let _ = started_tx.send(());
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<(), HandlerError>(())
            }
        },
        1,
    )
    .await
    .unwrap();

    let envelope = JobEnvelope::from_value("slow-work", json!({})).unwrap();
    enqueue(&registry, "slow", envelope, EnqueueOptions::default())
        .await
        .unwrap();
    started_rx.recv().await.unwrap();

    let first = registry.close_all().await;
    assert!(matches!(first, Err(HiveError::Timeout { timeout_secs: 1 })));
    assert_eq!(connector.connects(), 2);
    assert_eq!(connector.closes(), 1);
    assert!(worker.is_closing());
    assert!(!worker.is_closed());
    assert!(worker.ensure_open().is_err());
    assert!(registry.get("slow", Role::Worker).await.is_some());
    assert!(registry.get("slow", Role::Producer).await.is_none());

    tokio::time::sleep(Duration::from_secs(10)).await;
    registry.close_all().await.unwrap();

    assert_eq!(connector.closes(), 2);
    assert!(worker.is_closed());
    assert!(registry.is_empty().await);
}
