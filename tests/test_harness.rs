//! Shared fixtures for queue, server and worker integration tests.
#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use testpool::config::{QueueServerConfig, WorkerConfiguration};
use testpool::models::{
    Bucket, BucketId, JobId, RequestId, TestEntry, TestEntryConfiguration, TestEntryResult,
    TestOutcome, TestingResult, ToolResources, WorkerCapability, WorkerCapabilityConstraint,
    WorkerCapabilityRequirement, WorkerId,
};
use testpool::scheduler::{BucketQueue, DequeueContext, DequeueResult, PrioritizedJob};
use testpool::worker::BucketExecutor;

pub const CHECK_AGAIN: Duration = Duration::from_secs(30);

pub fn entry(method: &str) -> TestEntry {
    TestEntry::new("FixtureTests", method)
}

pub fn bucket(methods: &[&str]) -> Bucket {
    Bucket::new(
        methods.iter().map(|m| entry(m)).collect(),
        "simulator",
        BTreeSet::new(),
        ToolResources::new(),
    )
}

pub fn bucket_on(test_destination: &str, methods: &[&str]) -> Bucket {
    Bucket::new(
        methods.iter().map(|m| entry(m)).collect(),
        test_destination,
        BTreeSet::new(),
        ToolResources::new(),
    )
}

pub fn bucket_requiring(methods: &[&str], name: &str, value: &str) -> Bucket {
    let requirements = BTreeSet::from([WorkerCapabilityRequirement::new(
        name,
        WorkerCapabilityConstraint::Equal(value.to_string()),
    )]);
    Bucket::new(
        methods.iter().map(|m| entry(m)).collect(),
        "simulator",
        requirements,
        ToolResources::new(),
    )
}

pub fn worker(id: &str) -> WorkerId {
    WorkerId::from(id)
}

pub fn request(id: &str) -> RequestId {
    RequestId::from(id)
}

pub fn job(id: &str) -> PrioritizedJob {
    PrioritizedJob::new(id, 0)
}

pub fn job_id(id: &str) -> JobId {
    JobId::from(id)
}

pub fn capabilities(pairs: &[(&str, &str)]) -> BTreeSet<WorkerCapability> {
    pairs
        .iter()
        .map(|(n, v)| WorkerCapability::new(*n, *v))
        .collect()
}

pub fn bucket_queue(number_of_retries: u32) -> BucketQueue {
    BucketQueue::new(number_of_retries, CHECK_AGAIN)
}

/// Context of a worker that is the only one in the pool.
pub fn solo(worker_id: &str, request_id: &str) -> DequeueContext {
    DequeueContext::single(request(request_id), worker(worker_id), BTreeSet::new())
}

/// Context of `worker_id` in a pool of `pool` capability-less workers.
pub fn in_pool(worker_id: &str, request_id: &str, pool: &[&str]) -> DequeueContext {
    DequeueContext {
        request_id: request(request_id),
        worker_id: worker(worker_id),
        capabilities: BTreeSet::new(),
        pullable_workers: pool
            .iter()
            .map(|w| (worker(w), BTreeSet::new()))
            .collect::<HashMap<_, _>>(),
    }
}

pub fn expect_dequeued(result: DequeueResult) -> testpool::models::DequeuedBucket {
    match result {
        DequeueResult::Dequeued(dequeued) => dequeued,
        other => panic!("expected a dequeued bucket, got {other:?}"),
    }
}

pub fn all_passed(bucket: &Bucket) -> TestingResult {
    with_outcome(bucket, TestOutcome::Passed)
}

pub fn all_failed(bucket: &Bucket) -> TestingResult {
    with_outcome(bucket, TestOutcome::Failed)
}

pub fn with_outcome(bucket: &Bucket, outcome: TestOutcome) -> TestingResult {
    TestingResult::new(
        bucket,
        bucket
            .entries
            .iter()
            .map(|e| TestEntryResult::new(e.clone(), outcome))
            .collect(),
    )
}

/// A result that names `bucket_id` but carries no per-entry results.
pub fn empty_result(bucket_id: BucketId) -> TestingResult {
    TestingResult {
        bucket_id,
        test_destination: "simulator".to_string(),
        results: Vec::new(),
    }
}

pub fn configurations(methods: &[&str]) -> Vec<TestEntryConfiguration> {
    methods
        .iter()
        .map(|m| TestEntryConfiguration::new(entry(m), "simulator"))
        .collect()
}

/// Server configuration with short intervals for tests.
pub fn test_config() -> QueueServerConfig {
    QueueServerConfig {
        check_again_time_interval_secs: 1,
        worker_alive_timeout_secs: 10,
        aliveness_polling_interval_secs: 1,
        stuck_buckets_polling_interval_secs: 1,
        aliveness_metric_report_interval_secs: 60,
        number_of_retries: 1,
        default_worker_configuration: WorkerConfiguration {
            number_of_parallel_buckets: 1,
            report_alive_interval_secs: 2,
        },
        ..QueueServerConfig::default()
    }
}

/// Executor that decides outcomes by test method name and records every
/// bucket it ran. Tests not listed in `outcomes` pass.
#[derive(Default)]
pub struct FakeExecutor {
    outcomes: HashMap<String, Vec<TestOutcome>>,
    executed: Mutex<Vec<Bucket>>,
    delay: Duration,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcomes for consecutive runs of `method`; the last one repeats.
    pub fn with_outcomes(mut self, method: &str, outcomes: Vec<TestOutcome>) -> Self {
        self.outcomes.insert(method.to_string(), outcomes);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub async fn executed(&self) -> Vec<Bucket> {
        self.executed.lock().await.clone()
    }

    async fn runs_of(&self, entry: &TestEntry) -> usize {
        self.executed
            .lock()
            .await
            .iter()
            .flat_map(|b| b.entries.iter())
            .filter(|e| *e == entry)
            .count()
    }
}

#[async_trait]
impl BucketExecutor for FakeExecutor {
    async fn execute(&self, bucket: &Bucket) -> TestingResult {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut results = Vec::new();
        for entry in &bucket.entries {
            let run = self.runs_of(entry).await;
            let outcome = self
                .outcomes
                .get(&entry.method_name)
                .and_then(|o| o.get(run).or_else(|| o.last()).copied())
                .unwrap_or(TestOutcome::Passed);
            results.push(TestEntryResult::new(entry.clone(), outcome));
        }

        self.executed.lock().await.push(bucket.clone());
        TestingResult::new(bucket, results)
    }
}

/// Polls `condition` every 100ms until it holds or `timeout` elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    condition().await
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
