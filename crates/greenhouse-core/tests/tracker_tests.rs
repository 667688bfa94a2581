//! Pending-request tracker tests

use greenhouse_core::{spawn_sweeper, PendingRequests, Request};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_timeout_fires_once_within_sweep_window() {
    let tracker = Arc::new(PendingRequests::new());
    let fired: Arc<Mutex<Vec<(u32, Instant)>>> = Arc::new(Mutex::new(Vec::new()));

    let f = fired.clone();
    tracker.timeouts().add(move |event: &greenhouse_core::TimeoutEvent<Request>| {
        f.lock().push((event.id, Instant::now()));
    });

    let sweep = Duration::from_millis(50);
    let ttl = Duration::from_millis(100);
    let _sweeper = spawn_sweeper(&tracker, sweep);

    let sent_at = Instant::now();
    tracker.put(1, Request::Heartbeat, ttl);

    tokio::time::sleep(Duration::from_millis(500)).await;

    let fired = fired.lock();
    assert_eq!(fired.len(), 1);
    let (id, at) = fired[0];
    assert_eq!(id, 1);
    let elapsed = at - sent_at;
    assert!(elapsed >= ttl, "fired early: {:?}", elapsed);
    assert!(elapsed <= ttl + sweep, "fired late: {:?}", elapsed);
    assert!(tracker.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_answered_request_never_times_out() {
    let tracker = Arc::new(PendingRequests::new());
    let fired = Arc::new(Mutex::new(0));

    let f = fired.clone();
    tracker
        .timeouts()
        .add(move |_: &greenhouse_core::TimeoutEvent<Request>| *f.lock() += 1);
    let _sweeper = spawn_sweeper(&tracker, Duration::from_millis(50));

    tracker.put(7, Request::Heartbeat, Duration::from_millis(100));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(tracker.pull(7), Some(Request::Heartbeat));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(*fired.lock(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_response_is_unmatched() {
    let tracker = Arc::new(PendingRequests::new());
    let _sweeper = spawn_sweeper(&tracker, Duration::from_millis(10));

    tracker.put(3, Request::GetFieldNodePool, Duration::from_millis(30));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(tracker.pull(3), None);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_stops_with_tracker() {
    let tracker = Arc::new(PendingRequests::<Request>::new());
    let sweeper = spawn_sweeper(&tracker, Duration::from_millis(10));

    drop(tracker);
    tokio::time::timeout(Duration::from_secs(1), sweeper)
        .await
        .expect("sweeper did not stop")
        .unwrap();
}
