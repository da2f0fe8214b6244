mod test_harness;

use std::sync::Arc;
use std::time::Duration;

use test_harness::*;
use testpool::error::QueueError;
use testpool::models::StuckBucketReason;
use testpool::scheduler::{
    DequeueResult, JobStatus, MultipleQueuesContainer, PrioritizedJob, StuckBucketsReenqueuer,
    WorkerAlivenessTracker,
};
use tokio::sync::RwLock;

fn container() -> MultipleQueuesContainer {
    MultipleQueuesContainer::new(2, CHECK_AGAIN)
}

fn tracker_with(workers: &[&str]) -> RwLock<WorkerAlivenessTracker> {
    let mut tracker = WorkerAlivenessTracker::new(Duration::from_secs(60));
    for w in workers {
        tracker.register_worker(worker(w));
    }
    RwLock::new(tracker)
}

async fn enqueue(container: &MultipleQueuesContainer, job: PrioritizedJob, methods: &[&str]) {
    container
        .enqueue(job, vec![bucket(methods)], || bucket_queue(1))
        .await
        .unwrap();
}

#[tokio::test]
async fn no_jobs_means_check_again_later() {
    let container = container();
    let aliveness = tracker_with(&["w1"]);

    let result = container.dequeue(&solo("w1", "r1"), &aliveness).await;
    assert_eq!(result, DequeueResult::CheckAgainLater { after: CHECK_AGAIN });
    assert!(container.running_queue_state().await.is_depleted());
}

#[tokio::test]
async fn accept_without_any_job_is_unknown_bucket() {
    let container = container();
    let err = container
        .accept(all_passed(&bucket(&["testA"])), &request("r1"), &worker("w1"))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::UnknownBucket { .. }));
}

#[tokio::test]
async fn higher_priority_jobs_are_served_first() {
    let container = container();
    let aliveness = tracker_with(&["w1"]);
    enqueue(&container, PrioritizedJob::new("low", 0), &["testLow"]).await;
    enqueue(&container, PrioritizedJob::new("high", 10), &["testHigh"]).await;
    enqueue(&container, PrioritizedJob::new("low-later", 0), &["testLowLater"]).await;

    assert_eq!(
        container.ongoing_job_ids().await,
        vec![job_id("high"), job_id("low"), job_id("low-later")]
    );

    let first = expect_dequeued(container.dequeue(&solo("w1", "r1"), &aliveness).await);
    assert_eq!(first.bucket().entries, vec![entry("testHigh")]);
    let second = expect_dequeued(container.dequeue(&solo("w1", "r2"), &aliveness).await);
    assert_eq!(second.bucket().entries, vec![entry("testLow")]);
    let third = expect_dequeued(container.dequeue(&solo("w1", "r3"), &aliveness).await);
    assert_eq!(third.bucket().entries, vec![entry("testLowLater")]);
}

#[tokio::test]
async fn repeated_request_returns_bucket_across_jobs() {
    let container = container();
    let aliveness = tracker_with(&["w1"]);
    enqueue(&container, job("first"), &["testA"]).await;

    let dequeued = expect_dequeued(container.dequeue(&solo("w1", "r1"), &aliveness).await);

    // A higher-priority job arriving in between does not change the answer.
    enqueue(&container, PrioritizedJob::new("urgent", 99), &["testUrgent"]).await;
    let again = expect_dequeued(container.dequeue(&solo("w1", "r1"), &aliveness).await);
    assert_eq!(dequeued, again);
}

#[tokio::test]
async fn dequeue_marks_bucket_as_processing() {
    let container = container();
    let aliveness = tracker_with(&["w1"]);
    enqueue(&container, job("job"), &["testA"]).await;

    let dequeued = expect_dequeued(container.dequeue(&solo("w1", "r1"), &aliveness).await);
    assert_eq!(
        aliveness
            .read()
            .await
            .stuck_reason(&worker("w1"), dequeued.bucket_id()),
        None
    );
    assert!(container.reenqueue_stuck_buckets(&aliveness).await.is_empty());
}

#[tokio::test]
async fn enqueue_into_existing_job_appends() {
    let container = container();
    enqueue(&container, job("job"), &["testA"]).await;
    enqueue(&container, job("job"), &["testB"]).await;

    assert_eq!(container.ongoing_job_ids().await, vec![job_id("job")]);
    let state = container.job_state(&job_id("job")).await.unwrap();
    assert_eq!(state.queue_state.enqueued_bucket_count, 2);
    assert_eq!(state.status, JobStatus::Running);
    assert!(!state.is_depleted);
}

#[tokio::test]
async fn accept_routes_to_owning_job() {
    let container = container();
    let aliveness = tracker_with(&["w1"]);
    enqueue(&container, job("a"), &["testA"]).await;
    enqueue(&container, job("b"), &["testB"]).await;

    expect_dequeued(container.dequeue(&solo("w1", "r1"), &aliveness).await);
    let from_b = expect_dequeued(container.dequeue(&solo("w1", "r2"), &aliveness).await);

    let (owner, accepted) = container
        .accept(all_passed(from_b.bucket()), &request("r2"), &worker("w1"))
        .await
        .unwrap();
    assert_eq!(owner, job_id("b"));
    assert_eq!(accepted.final_results.len(), 1);

    let results = container.job_results(&job_id("b")).await.unwrap();
    assert_eq!(results.final_results.len(), 1);
    assert_eq!(results.testing_results.len(), 1);
    assert!(container.job_state(&job_id("b")).await.unwrap().is_depleted);
}

#[tokio::test]
async fn deleted_job_still_accepts_outstanding_results() {
    let container = container();
    let aliveness = tracker_with(&["w1"]);
    container
        .enqueue(job("job"), vec![bucket(&["testA"]), bucket(&["testB"])], || {
            bucket_queue(1)
        })
        .await
        .unwrap();
    let dequeued = expect_dequeued(container.dequeue(&solo("w1", "r1"), &aliveness).await);

    container.delete_job(&job_id("job")).await.unwrap();
    assert!(container.ongoing_job_ids().await.is_empty());
    assert_eq!(container.deleted_job_ids().await, vec![job_id("job")]);

    let state = container.job_state(&job_id("job")).await.unwrap();
    assert_eq!(state.status, JobStatus::Deleted);
    assert_eq!(state.queue_state.enqueued_bucket_count, 0);
    assert_eq!(state.queue_state.dequeued_bucket_count, 1);

    // Nothing left to hand out.
    assert_eq!(
        container.dequeue(&solo("w1", "r2"), &aliveness).await,
        DequeueResult::CheckAgainLater { after: CHECK_AGAIN }
    );

    let (owner, _) = container
        .accept(all_failed(dequeued.bucket()), &request("r1"), &worker("w1"))
        .await
        .unwrap();
    assert_eq!(owner, job_id("job"));
    assert!(container.job_state(&job_id("job")).await.unwrap().is_depleted);
}

#[tokio::test]
async fn deleting_twice_or_unknown_job_fails() {
    let container = container();
    enqueue(&container, job("job"), &["testA"]).await;
    container.delete_job(&job_id("job")).await.unwrap();

    assert!(matches!(
        container.delete_job(&job_id("job")).await,
        Err(QueueError::JobAlreadyDeleted(_))
    ));
    assert!(matches!(
        container.delete_job(&job_id("missing")).await,
        Err(QueueError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn enqueue_into_deleted_job_fails() {
    let container = container();
    enqueue(&container, job("job"), &["testA"]).await;
    container.delete_job(&job_id("job")).await.unwrap();

    let err = container
        .enqueue(job("job"), vec![bucket(&["testB"])], || bucket_queue(1))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::JobAlreadyDeleted(_)));
}

#[tokio::test]
async fn unknown_job_queries_fail() {
    let container = container();
    assert!(matches!(
        container.job_state(&job_id("missing")).await,
        Err(QueueError::JobNotFound(_))
    ));
    assert!(matches!(
        container.job_results(&job_id("missing")).await,
        Err(QueueError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn deleted_jobs_are_bounded_oldest_first() {
    let container = container();
    for id in ["one", "two", "three"] {
        enqueue(&container, job(id), &["testA"]).await;
        container.delete_job(&job_id(id)).await.unwrap();
    }

    assert_eq!(
        container.deleted_job_ids().await,
        vec![job_id("two"), job_id("three")]
    );
    assert!(matches!(
        container.job_state(&job_id("one")).await,
        Err(QueueError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn stuck_reenqueuer_reclaims_buckets_of_blocked_workers() {
    let container = Arc::new(container());
    let aliveness = Arc::new(tracker_with(&["w1", "w2"]));
    enqueue(&container, job("job"), &["testA"]).await;
    let dequeued = expect_dequeued(container.dequeue(&solo("w1", "r1"), &aliveness).await);

    let reenqueuer = StuckBucketsReenqueuer::new(container.clone(), aliveness.clone());
    assert!(reenqueuer.reenqueue_stuck_buckets().await.is_empty());

    aliveness.write().await.disable_worker(&worker("w1")).unwrap();
    let stuck = reenqueuer.reenqueue_stuck_buckets().await;
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].reason, StuckBucketReason::WorkerIsBlocked);
    assert_eq!(stuck[0].bucket.bucket_id, *dequeued.bucket_id());

    let again = expect_dequeued(container.dequeue(&solo("w2", "r2"), &aliveness).await);
    assert_eq!(again.bucket_id(), dequeued.bucket_id());
}

#[tokio::test]
async fn buckets_of_unregistered_workers_are_invalid() {
    let container = container();
    let aliveness = tracker_with(&[]);
    enqueue(&container, job("job"), &["testA"]).await;
    expect_dequeued(container.dequeue(&solo("ghost", "r1"), &aliveness).await);

    let stuck = container.reenqueue_stuck_buckets(&aliveness).await;
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].reason, StuckBucketReason::WorkerIsInvalid);
}

#[tokio::test]
async fn re_registered_worker_loses_its_buckets() {
    let container = container();
    let aliveness = tracker_with(&["w1"]);
    enqueue(&container, job("job"), &["testA"]).await;
    expect_dequeued(container.dequeue(&solo("w1", "r1"), &aliveness).await);

    aliveness.write().await.register_worker(worker("w1"));
    let stuck = container.reenqueue_stuck_buckets(&aliveness).await;
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].reason, StuckBucketReason::BucketLost);
}

#[tokio::test]
async fn job_states_follow_routing_order() {
    let container = container();
    enqueue(&container, PrioritizedJob::new("low", 1), &["testA"]).await;
    enqueue(&container, PrioritizedJob::new("high", 2), &["testB", "testC"]).await;

    let states = container.job_states().await;
    let ids: Vec<_> = states.iter().map(|s| s.job_id.clone()).collect();
    assert_eq!(ids, vec![job_id("high"), job_id("low")]);

    let total = container.running_queue_state().await;
    assert_eq!(total.enqueued_bucket_count, 2);
    assert_eq!(total.enqueued_tests, 3);
}
