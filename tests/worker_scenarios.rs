use hiveq::prelude::*;
use hiveq::report::RecordingReporter;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, timeout};

const WAIT: Duration = Duration::from_secs(600);

async fn wait_for<F>(events: &mut tokio::sync::broadcast::Receiver<QueueEvent>, mut pred: F) -> QueueEvent
where
    F: FnMut(&QueueEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .unwrap()
}

fn settings() -> QueueSettings {
    QueueSettings::default().with_poll_interval(10)
}

#[tokio::test(start_paused = true)]
async fn successful_job_runs_once_and_is_removed() {
    let queue = JobQueue::in_memory(settings());
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let envelope = JobEnvelope::from_value("test-job", json!({"msg": "hello"})).unwrap();
    let id = queue
        .enqueue(TEST_JOB_QUEUE, envelope, EnqueueOptions::default())
        .await
        .unwrap();

    let worker = queue
        .registry()
        .get_or_create(TEST_JOB_QUEUE, Role::Worker)
        .await
        .unwrap();
    let mut events = worker.subscribe();

    let counter = Arc::clone(&calls);
    queue
        .register_handler(
            TEST_JOB_QUEUE,
            move |job: Job| {
                let counter = Arc::clone(&counter);
                let tx = tx.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let _ = tx.send(job.data.get("msg").cloned());
                    Ok::<(), HandlerError>(())
                }
            },
            1,
        )
        .await
        .unwrap();

    let event = wait_for(&mut events, |e| matches!(e, QueueEvent::Succeeded { .. })).await;
    assert_eq!(event, QueueEvent::Succeeded { job_id: id.clone() });
    assert_eq!(rx.recv().await, Some(Some(json!("hello"))));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(worker.backend().get_job(&id).await.unwrap().is_none());

    queue.close_all().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failing_job_is_tried_five_times_then_kept_as_failed() {
    let reporter = RecordingReporter::new();
    let queue = JobQueue::in_memory(settings())
        .with_reporter(Arc::new(reporter.clone()))
        .unwrap();
    let attempts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

    let worker = queue
        .registry()
        .get_or_create("flaky", Role::Worker)
        .await
        .unwrap();
    let mut events = worker.subscribe();

    let seen = Arc::clone(&attempts);
    queue
        .register_handler(
            "flaky",
            move |_job: Job| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().await.push(Instant::now());
                    Err::<(), HandlerError>("always fails".into())
                }
            },
            1,
        )
        .await
        .unwrap();

    let envelope = JobEnvelope::from_value("flaky-work", json!({})).unwrap();
    let id = queue
        .enqueue("flaky", envelope, EnqueueOptions::default())
        .await
        .unwrap();

    let event = wait_for(&mut events, |e| matches!(e, QueueEvent::Failed { .. })).await;
    match event {
        QueueEvent::Failed {
            job_id,
            job_type,
            error,
        } => {
            assert_eq!(job_id, id);
            assert_eq!(job_type, "flaky-work");
            assert_eq!(error.message, "always fails");
        }
        other => panic!("unexpected event {other:?}"),
    }

    let seen = attempts.lock().await.clone();
    assert_eq!(seen.len(), 5);
    let gaps: Vec<Duration> = seen.windows(2).map(|w| w[1] - w[0]).collect();
    for (gap, minimum) in gaps.iter().zip([5_000u64, 10_000, 20_000, 40_000]) {
        assert!(*gap >= Duration::from_millis(minimum), "gap {gap:?} < {minimum}ms");
    }
    assert!(gaps.windows(2).all(|w| w[1] > w[0]));

    let stored = worker.backend().get_job(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.attempts_made, 5);
    assert_eq!(worker.backend().stats().await.unwrap().failed, 1);

    let failures: Vec<_> = reporter
        .captured()
        .into_iter()
        .filter(|(_, ctx)| ctx.get("type") == Some("job-failed"))
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].1.get("queue_job_id"), Some(id.as_str()));
    assert_eq!(failures[0].1.get("job_type"), Some("flaky-work"));

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(attempts.lock().await.len(), 5);

    queue.close_all().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn concurrency_bound_is_respected() {
    let queue = JobQueue::in_memory(settings());
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    for n in 0..6 {
        let envelope = JobEnvelope::from_value("slow", json!({"n": n})).unwrap();
        queue
            .enqueue("slow", envelope, EnqueueOptions::default())
            .await
            .unwrap();
    }

    let (running_h, peak_h, done_h) = (Arc::clone(&running), Arc::clone(&peak), Arc::clone(&done));
    queue
        .register_handler(
            "slow",
            move |_job: Job| {
                let (running, peak, done) =
                    (Arc::clone(&running_h), Arc::clone(&peak_h), Arc::clone(&done_h));
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), HandlerError>(())
                }
            },
            2,
        )
        .await
        .unwrap();

    timeout(WAIT, async {
        while done.load(Ordering::SeqCst) < 6 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(peak.load(Ordering::SeqCst), 2);
    queue.close_all().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn close_waits_for_in_flight_jobs() {
    let queue = JobQueue::in_memory(settings());
    let finished = Arc::new(AtomicBool::new(false));
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();

    let flag = Arc::clone(&finished);
    let worker = queue
        .register_handler(
            "long",
            move |_job: Job| {
                let flag = Arc::clone(&flag);
                let started_tx = started_tx.clone();
                async move {
                    let _ = started_tx.send(());
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok::<(), HandlerError>(())
                }
            },
            1,
        )
        .await
        .unwrap();

    let envelope = JobEnvelope::from_value("long-work", json!({})).unwrap();
    let id = queue
        .enqueue("long", envelope, EnqueueOptions::default())
        .await
        .unwrap();

    timeout(WAIT, started_rx.recv()).await.unwrap();
    queue.close_all().await.unwrap();

    assert!(finished.load(Ordering::SeqCst));
    assert!(worker.is_closed());
    assert!(worker.backend().get_job(&id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn panicking_handler_counts_as_failure() {
    let queue = JobQueue::in_memory(settings());
    let worker = queue
        .registry()
        .get_or_create("panics", Role::Worker)
        .await
        .unwrap();
    let mut events = worker.subscribe();

    queue
        .register_handler(
            "panics",
            |_job: Job| async move {
                if true {
                    panic!("handler exploded");
                }
                Ok::<(), HandlerError>(())
            },
            1,
        )
        .await
        .unwrap();

    let envelope = JobEnvelope::from_value("boom", json!({})).unwrap();
    queue
        .enqueue("panics", envelope, EnqueueOptions::default().with_retries(0))
        .await
        .unwrap();

    match wait_for(&mut events, |e| matches!(e, QueueEvent::Failed { .. })).await {
        QueueEvent::Failed { error, .. } => assert_eq!(error.name, "Panic"),
        other => panic!("unexpected event {other:?}"),
    }

    queue.close_all().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn slow_handler_keeps_its_claim_past_stall_timeout() {
    let reporter = RecordingReporter::new();
    let queue = JobQueue::in_memory(settings().with_stall_timeout(1_000))
        .with_reporter(Arc::new(reporter.clone()))
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let worker = queue
        .registry()
        .get_or_create("slow-lease", Role::Worker)
        .await
        .unwrap();
    let mut events = worker.subscribe();

    let counter = Arc::clone(&calls);
    queue
        .register_handler(
            "slow-lease",
            move |_job: Job| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    Ok::<(), HandlerError>(())
                }
            },
            2,
        )
        .await
        .unwrap();

    let envelope = JobEnvelope::from_value("slow", json!({})).unwrap();
    let id = queue
        .enqueue("slow-lease", envelope, EnqueueOptions::default())
        .await
        .unwrap();

    let event = wait_for(&mut events, |e| matches!(e, QueueEvent::Succeeded { .. })).await;
    assert_eq!(event, QueueEvent::Succeeded { job_id: id });

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(reporter.captured().is_empty());

    queue.close_all().await.unwrap();
}
