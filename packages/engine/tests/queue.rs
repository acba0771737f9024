//! End-to-end tests for the queue dispatcher.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use engine::{QueueError, WorkQueue};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use work_core::{BoxError, QueueConfig, QueueEvent, QueueState, WorkError, WorkItem, WorkState};

#[derive(Debug, thiserror::Error)]
#[error("synthetic failure {0}")]
struct Synthetic(u32);

/// Poll until `cond` holds or a generous deadline passes.
async fn wait_until(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn drain(rx: &mut broadcast::Receiver<QueueEvent>) -> Vec<QueueEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn ok_item() -> WorkItem {
    WorkItem::new(|| async { Ok(Value::Null) })
}

#[tokio::test(flavor = "multi_thread")]
async fn throttle_bounds_concurrency() {
    let queue = WorkQueue::spawn(
        QueueConfig::new("throttle")
            .with_throttle(2)
            .with_attempts(1),
    )
    .await
    .unwrap();

    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for _ in 0..6 {
        let current = current.clone();
        let peak = peak.clone();
        queue
            .enqueue(WorkItem::new(move || {
                let current = current.clone();
                let peak = peak.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            }))
            .unwrap();
    }

    queue.start().await.unwrap();
    wait_until(|| queue.total_processed() == 6).await;

    assert!(peak.load(Ordering::SeqCst) <= 2, "throttle exceeded");
    assert_eq!(queue.count(), 0);
    queue.kill().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_item_attempted_exactly_attempts_times() {
    let queue = WorkQueue::spawn(QueueConfig::new("retry").with_attempts(3))
        .await
        .unwrap();
    let mut events = queue.subscribe();

    let calls = Arc::new(AtomicU32::new(0));
    let seen = calls.clone();
    let item = queue
        .enqueue_fn(move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err::<Value, BoxError>(Box::new(Synthetic(1)))
            }
        })
        .unwrap();

    queue.start().await.unwrap();
    wait_until(|| queue.total_processed() == 1).await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(item.state(), WorkState::Failed);
    assert_eq!(item.attempts(), 3);
    assert_eq!(queue.count(), 0);

    let events = drain(&mut events);
    let failures: Vec<bool> = events
        .iter()
        .filter_map(|e| match e {
            QueueEvent::ItemFailed { will_retry, .. } => Some(*will_retry),
            _ => None,
        })
        .collect();
    assert_eq!(failures, vec![true, true, false]);

    let processed = events
        .iter()
        .filter(|e| matches!(e, QueueEvent::ItemProcessed { .. }))
        .count();
    assert_eq!(processed, 1, "exactly one terminal outcome");
    queue.kill().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn retried_item_goes_to_the_tail() {
    let queue = WorkQueue::spawn(
        QueueConfig::new("fifo")
            .with_throttle(1)
            .with_attempts(2),
    )
    .await
    .unwrap();
    let mut events = queue.subscribe();

    let a_calls = Arc::new(AtomicU32::new(0));
    let seen = a_calls.clone();
    let flaky = WorkItem::new(move || {
        let seen = seen.clone();
        async move {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err::<Value, BoxError>(Box::new(Synthetic(0)))
            } else {
                Ok(json!("a"))
            }
        }
    })
    .with_tag("A");

    queue
        .enqueue_all([
            flaky,
            ok_item().with_tag("B"),
            ok_item().with_tag("C"),
        ])
        .unwrap();
    queue.start().await.unwrap();
    wait_until(|| queue.total_processed() == 3).await;

    let started: Vec<String> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            QueueEvent::ItemStarted { tag, .. } => tag,
            _ => None,
        })
        .collect();
    // A fails once and its retry is enqueued behind C.
    assert_eq!(started, vec!["A", "B", "C", "A"]);
    queue.kill().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_is_idempotent_and_fires_once() {
    let queue = WorkQueue::spawn(QueueConfig::new("stop")).await.unwrap();
    let mut events = queue.subscribe();

    queue.start().await.unwrap();
    queue.stop().await.unwrap();
    queue.stop().await.unwrap();

    assert_eq!(queue.state(), QueueState::Stopped);
    let stopped = drain(&mut events)
        .iter()
        .filter(|e| matches!(e, QueueEvent::Stopped { .. }))
        .count();
    assert_eq!(stopped, 1);
    queue.kill().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_waits_for_in_flight_items() {
    let queue = WorkQueue::spawn(QueueConfig::new("drain").with_attempts(1))
        .await
        .unwrap();

    queue
        .enqueue(WorkItem::new(|| async {
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok(Value::Null)
        }))
        .unwrap();
    queue.start().await.unwrap();
    wait_until(|| queue.in_flight() == 1).await;

    queue.stop().await.unwrap();
    assert_eq!(queue.state(), QueueState::PendingStop);

    wait_until(|| queue.state() == QueueState::Stopped).await;
    assert_eq!(queue.total_processed(), 1);

    // A stopped queue can be started again and keeps dispatching.
    queue.enqueue(ok_item()).unwrap();
    queue.start().await.unwrap();
    wait_until(|| queue.total_processed() == 2).await;
    queue.kill().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn pause_gates_dispatch_until_resumed() {
    let queue = WorkQueue::spawn(QueueConfig::new("pause")).await.unwrap();
    queue.start().await.unwrap();
    queue.pause().await.unwrap();
    assert_eq!(queue.state(), QueueState::Paused);

    queue.enqueue(ok_item()).unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(queue.total_processed(), 0);
    assert_eq!(queue.count(), 1);

    // start() from Paused releases the gate in place.
    queue.start().await.unwrap();
    wait_until(|| queue.total_processed() == 1).await;

    // Pause is only valid while processing.
    queue.stop().await.unwrap();
    assert!(matches!(
        queue.pause().await,
        Err(QueueError::InvalidState(QueueState::Stopped))
    ));
    queue.kill().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn kill_clears_counts_and_tears_down() {
    let queue = WorkQueue::spawn(QueueConfig::new("kill")).await.unwrap();
    let mut events = queue.subscribe();

    queue.enqueue_all((0..4).map(|_| ok_item())).unwrap();
    queue.start().await.unwrap();
    wait_until(|| queue.total_processed() >= 1).await;

    queue.kill().await.unwrap();
    assert_eq!(queue.state(), QueueState::Killed);
    assert_eq!(queue.count(), 0);
    assert_eq!(queue.total_processed(), 0);

    // The dispatcher is gone for good.
    assert!(matches!(queue.start().await, Err(QueueError::Closed(_))));
    assert!(queue.enqueue(ok_item()).is_err());
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, QueueEvent::Killed { .. }))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_empty_fires_on_drain() {
    let queue = WorkQueue::spawn(QueueConfig::new("empty")).await.unwrap();
    let mut events = queue.subscribe();

    queue.enqueue_all([ok_item(), ok_item()]).unwrap();
    queue.start().await.unwrap();
    wait_until(|| queue.total_processed() == 2).await;

    let events = drain(&mut events);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, QueueEvent::QueueEmpty { .. }))
    );
    assert!(
        events
            .iter()
            .any(|e| matches!(e, QueueEvent::ItemsAdded { count: 2, .. }))
    );
    queue.kill().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_clears_pending_and_statistics() {
    let queue = WorkQueue::spawn(QueueConfig::new("reset")).await.unwrap();

    queue.enqueue_all((0..3).map(|_| ok_item())).unwrap();
    assert_eq!(queue.count(), 3);

    queue.reset().await.unwrap();
    assert_eq!(queue.count(), 0);
    assert_eq!(queue.total_processed(), 0);

    // Still usable afterwards.
    queue.enqueue(ok_item()).unwrap();
    queue.start().await.unwrap();
    wait_until(|| queue.total_processed() == 1).await;
    queue.kill().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn item_failure_surfaces_original_cause() {
    let queue = WorkQueue::spawn(QueueConfig::new("cause").with_attempts(1))
        .await
        .unwrap();
    let mut events = queue.subscribe();

    queue
        .enqueue(
            WorkItem::new(|| async { Err::<Value, BoxError>(Box::new(Synthetic(42))) })
                .with_tag("doomed"),
        )
        .unwrap();
    queue.start().await.unwrap();
    wait_until(|| queue.total_processed() == 1).await;

    let failure = drain(&mut events).into_iter().find_map(|e| match e {
        QueueEvent::ItemFailed { error, tag, .. } => Some((error, tag)),
        _ => None,
    });
    let (error, tag) = failure.expect("failure event missing");
    assert_eq!(tag.as_deref(), Some("doomed"));
    let WorkError::Failed(cause) = &*error else {
        panic!("expected Failed, got {error:?}");
    };
    assert_eq!(cause.downcast_ref::<Synthetic>().unwrap().0, 42);
    queue.kill().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn item_timeout_counts_as_failed_attempt() {
    let queue = WorkQueue::spawn(
        QueueConfig::new("timeout")
            .with_attempts(2)
            .with_item_timeout(Duration::from_millis(20)),
    )
    .await
    .unwrap();
    let mut events = queue.subscribe();

    let item = queue
        .enqueue_fn(|| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Value::Null)
        })
        .unwrap();

    queue.start().await.unwrap();
    wait_until(|| queue.total_processed() == 1).await;

    assert_eq!(item.state(), WorkState::Failed);
    let timeouts = drain(&mut events)
        .iter()
        .filter(|e| {
            matches!(
                e,
                QueueEvent::ItemFailed { error, .. } if error.is_timeout()
            )
        })
        .count();
    assert_eq!(timeouts, 2);
    queue.kill().await.unwrap();
}

#[tokio::test]
async fn invalid_configuration_is_fatal_at_construction() {
    let err = WorkQueue::spawn(QueueConfig::new("bad").with_throttle(0))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::InvalidThrottle));

    let err = WorkQueue::spawn(QueueConfig::new("bad").with_attempts(0))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::InvalidAttempts));
}
