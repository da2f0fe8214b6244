mod test_harness;

use std::time::Duration;

use test_harness::*;
use testpool::error::QueueError;
use testpool::models::{BucketId, StuckBucketReason};
use testpool::scheduler::{WorkerAliveness, WorkerAlivenessTracker};

const TIMEOUT: Duration = Duration::from_secs(10);

fn tracker() -> WorkerAlivenessTracker {
    WorkerAlivenessTracker::new(TIMEOUT)
}

#[tokio::test(start_paused = true)]
async fn unknown_worker_is_not_registered() {
    let mut tracker = tracker();
    assert_eq!(tracker.aliveness(&worker("w1")), WorkerAliveness::NotRegistered);
    assert!(matches!(
        tracker.mark_alive(&worker("w1")),
        Err(QueueError::WorkerNotRegistered(_))
    ));
    assert!(!tracker.can_pull(&worker("w1")));
}

#[tokio::test(start_paused = true)]
async fn worker_goes_silent_after_timeout() {
    let mut tracker = tracker();
    tracker.register_worker(worker("w1"));
    assert!(tracker.can_pull(&worker("w1")));

    tokio::time::advance(Duration::from_secs(9)).await;
    assert!(tracker.mark_silent_workers().is_empty());

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(tracker.mark_silent_workers(), vec![worker("w1")]);
    assert!(matches!(
        tracker.aliveness(&worker("w1")),
        WorkerAliveness::Silent { .. }
    ));
    assert!(!tracker.has_any_alive_worker());

    // Already silent: not reported again.
    assert!(tracker.mark_silent_workers().is_empty());
}

#[tokio::test(start_paused = true)]
async fn heartbeat_keeps_worker_alive_and_revives_silent_one() {
    let mut tracker = tracker();
    tracker.register_worker(worker("w1"));

    tokio::time::advance(Duration::from_secs(8)).await;
    tracker.mark_alive(&worker("w1")).unwrap();
    tokio::time::advance(Duration::from_secs(8)).await;
    assert!(tracker.mark_silent_workers().is_empty());

    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(tracker.mark_silent_workers().len(), 1);

    tracker.mark_alive(&worker("w1")).unwrap();
    assert!(tracker.can_pull(&worker("w1")));
}

#[tokio::test(start_paused = true)]
async fn blocked_worker_stays_blocked_until_enabled() {
    let mut tracker = tracker();
    tracker.register_worker(worker("w1"));
    tracker.disable_worker(&worker("w1")).unwrap();

    assert_eq!(tracker.aliveness(&worker("w1")), WorkerAliveness::Blocked);
    tracker.mark_alive(&worker("w1")).unwrap();
    assert_eq!(tracker.aliveness(&worker("w1")), WorkerAliveness::Blocked);

    // Re-registration does not lift an operator block.
    tracker.register_worker(worker("w1"));
    assert!(!tracker.can_pull(&worker("w1")));

    tracker.enable_worker(&worker("w1")).unwrap();
    assert!(tracker.can_pull(&worker("w1")));
}

#[tokio::test(start_paused = true)]
async fn enabling_unknown_worker_fails() {
    let mut tracker = tracker();
    assert!(tracker.enable_worker(&worker("w1")).is_err());
    assert!(tracker.disable_worker(&worker("w1")).is_err());
}

#[tokio::test(start_paused = true)]
async fn stuck_reason_follows_worker_state() {
    let mut tracker = tracker();
    let bucket_id = BucketId::from("bucket-1");

    assert_eq!(
        tracker.stuck_reason(&worker("w1"), &bucket_id),
        Some(StuckBucketReason::WorkerIsInvalid)
    );

    tracker.register_worker(worker("w1"));
    assert_eq!(
        tracker.stuck_reason(&worker("w1"), &bucket_id),
        Some(StuckBucketReason::BucketLost)
    );

    tracker.set_bucket_processing(&worker("w1"), &bucket_id);
    assert_eq!(tracker.stuck_reason(&worker("w1"), &bucket_id), None);
    assert_eq!(
        tracker.aliveness(&worker("w1")),
        WorkerAliveness::Alive {
            bucket_ids_being_processed: [bucket_id.clone()].into()
        }
    );

    tracker.disable_worker(&worker("w1")).unwrap();
    assert_eq!(
        tracker.stuck_reason(&worker("w1"), &bucket_id),
        Some(StuckBucketReason::WorkerIsBlocked)
    );
    tracker.enable_worker(&worker("w1")).unwrap();

    tokio::time::advance(TIMEOUT).await;
    tracker.mark_silent_workers();
    assert_eq!(
        tracker.stuck_reason(&worker("w1"), &bucket_id),
        Some(StuckBucketReason::BucketLost)
    );
}

#[tokio::test(start_paused = true)]
async fn processed_bucket_is_no_longer_tracked() {
    let mut tracker = tracker();
    let bucket_id = BucketId::from("bucket-1");
    tracker.register_worker(worker("w1"));
    tracker.set_bucket_processing(&worker("w1"), &bucket_id);
    tracker.bucket_processed(&worker("w1"), &bucket_id);

    assert_eq!(
        tracker.aliveness(&worker("w1")),
        WorkerAliveness::Alive {
            bucket_ids_being_processed: Default::default()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn counts_and_listings() {
    let mut tracker = tracker();
    tracker.register_worker(worker("w3"));
    tracker.register_worker(worker("w1"));
    tokio::time::advance(TIMEOUT).await;
    tracker.register_worker(worker("w2"));
    tracker.mark_silent_workers();
    tracker.disable_worker(&worker("w3")).unwrap();

    let counts = tracker.counts();
    assert_eq!(counts.alive, 1);
    assert_eq!(counts.silent, 1);
    assert_eq!(counts.blocked, 1);

    assert_eq!(tracker.alive_workers(), vec![worker("w2")]);
    let all: Vec<_> = tracker.all_workers().into_iter().map(|(id, _)| id).collect();
    assert_eq!(all, vec![worker("w1"), worker("w2"), worker("w3")]);
}
