use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QueueError, Result};
use crate::models::{
    Bucket, BucketId, DequeuedBucket, EnqueuedBucket, RequestId, StuckBucket, StuckBucketReason,
    TestEntry, TestEntryResult, TestOutcome, TestingResult, WorkerCapability, WorkerId,
};
use crate::scheduler::capabilities::requirements_satisfied;
use crate::scheduler::history::TestHistoryTracker;

/// Outcome of a dequeue attempt. Only `Dequeued` hands out work; the other two
/// tell the worker to come back later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DequeueResult {
    Dequeued(DequeuedBucket),
    CheckAgainLater { after: Duration },
    QueueIsEmpty,
}

/// Who is asking for work, and who else could take it right now.
///
/// Built by the server from the aliveness tracker, the capability storage and
/// the utilization policy; only permitted workers ever get one.
#[derive(Debug, Clone)]
pub struct DequeueContext {
    pub request_id: RequestId,
    pub worker_id: WorkerId,
    pub capabilities: BTreeSet<WorkerCapability>,
    /// Every worker currently allowed to pull, including the requester.
    pub pullable_workers: HashMap<WorkerId, BTreeSet<WorkerCapability>>,
}

impl DequeueContext {
    /// Context for a worker that is alone in the pool.
    pub fn single(
        request_id: RequestId,
        worker_id: WorkerId,
        capabilities: BTreeSet<WorkerCapability>,
    ) -> Self {
        let pullable_workers = HashMap::from([(worker_id.clone(), capabilities.clone())]);
        Self {
            request_id,
            worker_id,
            capabilities,
            pullable_workers,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningQueueState {
    pub enqueued_bucket_count: usize,
    pub dequeued_bucket_count: usize,
    pub enqueued_tests: usize,
    pub dequeued_tests: usize,
}

impl RunningQueueState {
    pub fn is_depleted(&self) -> bool {
        self.enqueued_bucket_count == 0 && self.dequeued_bucket_count == 0
    }

    pub fn merge(self, other: RunningQueueState) -> Self {
        Self {
            enqueued_bucket_count: self.enqueued_bucket_count + other.enqueued_bucket_count,
            dequeued_bucket_count: self.dequeued_bucket_count + other.dequeued_bucket_count,
            enqueued_tests: self.enqueued_tests + other.enqueued_tests,
            dequeued_tests: self.dequeued_tests + other.dequeued_tests,
        }
    }
}

/// Verdict for a test entry that will not run again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalTestEntryResult {
    pub test_entry: TestEntry,
    pub outcome: TestOutcome,
    pub attempts: u32,
    pub last_result: TestEntryResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "caseId", rename_all = "camelCase")]
pub enum AcceptSummary {
    /// Some entries failed and were put back into the queue in a new bucket.
    #[serde(rename_all = "camelCase")]
    RetriesScheduled {
        retry_bucket_id: BucketId,
        entry_count: usize,
    },
    /// Nothing from this bucket runs again; the job may now be depleted.
    MayBeDepleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketQueueAcceptResult {
    pub dequeued_bucket: DequeuedBucket,
    pub final_results: Vec<FinalTestEntryResult>,
    pub summary: AcceptSummary,
}

/// Bucket queue of a single job.
///
/// Each bucket moves `enqueued → dequeued → {resulted | stuck → enqueued}`.
/// A bucket id is dequeued at most once at a time, and nothing leaves the
/// queue except through an accepted result.
#[derive(Debug)]
pub struct BucketQueue {
    enqueued: VecDeque<EnqueuedBucket>,
    dequeued: Vec<DequeuedBucket>,
    history: TestHistoryTracker,
    check_again_interval: Duration,
    schedules_retries: bool,
    testing_results: Vec<TestingResult>,
    final_results: Vec<FinalTestEntryResult>,
}

impl BucketQueue {
    pub fn new(number_of_retries: u32, check_again_interval: Duration) -> Self {
        Self {
            enqueued: VecDeque::new(),
            dequeued: Vec::new(),
            history: TestHistoryTracker::new(number_of_retries),
            check_again_interval,
            schedules_retries: true,
            testing_results: Vec::new(),
            final_results: Vec::new(),
        }
    }

    /// Appends buckets behind everything already waiting.
    pub fn enqueue(&mut self, buckets: Vec<Bucket>) {
        for bucket in buckets {
            tracing::debug!(bucket_id = %bucket.bucket_id, tests = bucket.entries.len(), "Bucket enqueued");
            self.enqueued.push_back(EnqueuedBucket::new(bucket));
        }
    }

    /// Puts a bucket at the head of the queue so it is picked up first.
    fn enqueue_first(&mut self, bucket: Bucket) {
        self.enqueued.push_front(EnqueuedBucket::new(bucket));
    }

    pub fn previously_dequeued_bucket(
        &self,
        request_id: &RequestId,
        worker_id: &WorkerId,
    ) -> Option<&DequeuedBucket> {
        self.dequeued
            .iter()
            .find(|d| d.is_claimed_by(request_id, worker_id))
    }

    pub fn dequeue_bucket(&mut self, ctx: &DequeueContext) -> DequeueResult {
        if let Some(previous) = self.previously_dequeued_bucket(&ctx.request_id, &ctx.worker_id) {
            return DequeueResult::Dequeued(previous.clone());
        }

        if self.enqueued.is_empty() {
            return if self.dequeued.is_empty() {
                DequeueResult::QueueIsEmpty
            } else {
                // Outstanding buckets may still produce retries.
                self.check_again_later()
            };
        }

        let position = self.enqueued.iter().position(|enqueued| {
            let bucket = &enqueued.bucket;
            requirements_satisfied(&bucket.requirements, &ctx.capabilities)
                && !self.is_dequeued(&bucket.bucket_id)
                && self.should_go_to(bucket, ctx)
        });

        let Some(enqueued) = position.and_then(|p| self.enqueued.remove(p)) else {
            return self.check_again_later();
        };

        let dequeued = DequeuedBucket {
            enqueued_bucket: enqueued,
            worker_id: ctx.worker_id.clone(),
            request_id: ctx.request_id.clone(),
        };
        tracing::info!(
            bucket_id = %dequeued.bucket_id(),
            worker_id = %ctx.worker_id,
            request_id = %ctx.request_id,
            tests = dequeued.bucket().entries.len(),
            "Bucket dequeued"
        );
        self.dequeued.push(dequeued.clone());
        DequeueResult::Dequeued(dequeued)
    }

    fn check_again_later(&self) -> DequeueResult {
        DequeueResult::CheckAgainLater {
            after: self.check_again_interval,
        }
    }

    fn is_dequeued(&self, bucket_id: &BucketId) -> bool {
        self.dequeued.iter().any(|d| d.bucket_id() == bucket_id)
    }

    /// A worker that already failed some of the bucket's tests only gets it
    /// when no other pullable, capable worker is left that has not.
    fn should_go_to(&self, bucket: &Bucket, ctx: &DequeueContext) -> bool {
        let failed_by = |worker_id: &WorkerId| {
            bucket
                .entries
                .iter()
                .any(|entry| self.history.failed_by(&bucket.lineage_id, entry, worker_id))
        };

        if !failed_by(&ctx.worker_id) {
            return true;
        }

        !ctx.pullable_workers.iter().any(|(worker_id, capabilities)| {
            worker_id != &ctx.worker_id
                && requirements_satisfied(&bucket.requirements, capabilities)
                && !failed_by(worker_id)
        })
    }

    pub fn accept(
        &mut self,
        testing_result: TestingResult,
        request_id: &RequestId,
        worker_id: &WorkerId,
    ) -> Result<BucketQueueAcceptResult> {
        let position = self
            .dequeued
            .iter()
            .position(|d| d.is_claimed_by(request_id, worker_id))
            .ok_or_else(|| QueueError::UnknownBucket {
                request_id: request_id.clone(),
                worker_id: worker_id.clone(),
            })?;
        let dequeued_bucket = self.dequeued.remove(position);
        let bucket = dequeued_bucket.bucket().clone();

        if testing_result.bucket_id != bucket.bucket_id {
            tracing::warn!(
                expected = %bucket.bucket_id,
                reported = %testing_result.bucket_id,
                worker_id = %worker_id,
                "Testing result names a different bucket than the one dequeued by this request"
            );
        }
        for result in &testing_result.results {
            if !bucket.entries.contains(&result.test_entry) {
                tracing::warn!(
                    test = %result.test_entry,
                    bucket_id = %bucket.bucket_id,
                    "Ignoring result for a test that is not part of the bucket"
                );
            }
        }

        let mut final_results = Vec::new();
        let mut retry_entries = Vec::new();

        for entry in &bucket.entries {
            let result = testing_result
                .result_for(entry)
                .cloned()
                .unwrap_or_else(|| TestEntryResult::crashed(entry.clone(), "no result reported"));
            let lineage_id = &bucket.lineage_id;
            let attempts = self.history.register_attempt(
                lineage_id,
                entry,
                worker_id,
                &bucket.bucket_id,
                result.outcome,
            );

            if self.history.is_final(lineage_id, entry) {
                tracing::debug!(test = %entry, "Result for an already final test recorded without effect");
                continue;
            }

            if result.outcome.is_failure()
                && self.schedules_retries
                && self.history.retry_eligible(lineage_id, entry)
            {
                retry_entries.push(entry.clone());
                continue;
            }

            let outcome = if result.outcome.is_failure() {
                TestOutcome::Failed
            } else {
                TestOutcome::Passed
            };
            self.history.finalize(lineage_id, entry, outcome);
            final_results.push(FinalTestEntryResult {
                test_entry: entry.clone(),
                outcome,
                attempts,
                last_result: result,
            });
        }

        let summary = if retry_entries.is_empty() {
            AcceptSummary::MayBeDepleted
        } else {
            let entry_count = retry_entries.len();
            let retry_bucket = bucket.with_entries(retry_entries);
            let retry_bucket_id = retry_bucket.bucket_id.clone();
            tracing::info!(
                bucket_id = %bucket.bucket_id,
                retry_bucket_id = %retry_bucket_id,
                tests = entry_count,
                "Retry scheduled for failed tests"
            );
            self.enqueue_first(retry_bucket);
            AcceptSummary::RetriesScheduled {
                retry_bucket_id,
                entry_count,
            }
        };

        tracing::info!(
            bucket_id = %bucket.bucket_id,
            worker_id = %worker_id,
            final_tests = final_results.len(),
            "Bucket result accepted"
        );

        self.final_results.extend(final_results.iter().cloned());
        self.testing_results.push(testing_result);

        Ok(BucketQueueAcceptResult {
            dequeued_bucket,
            final_results,
            summary,
        })
    }

    /// Moves every dequeued bucket whose worker is no longer fit to hold it
    /// back to the head of the queue. `stuck_reason` decides per bucket.
    ///
    /// Once the job is deleted nothing is reenqueued: the bucket is dropped
    /// and its open entries are reported as failed, so the job still
    /// depletes.
    pub fn reenqueue_stuck_buckets<F>(&mut self, stuck_reason: F) -> Vec<StuckBucket>
    where
        F: Fn(&DequeuedBucket) -> Option<StuckBucketReason>,
    {
        let mut stuck = Vec::new();
        let mut still_dequeued = Vec::with_capacity(self.dequeued.len());

        for dequeued in std::mem::take(&mut self.dequeued) {
            match stuck_reason(&dequeued) {
                Some(reason) => stuck.push((reason, dequeued)),
                None => still_dequeued.push(dequeued),
            }
        }
        self.dequeued = still_dequeued;

        stuck
            .into_iter()
            .map(|(reason, dequeued)| {
                let bucket = dequeued.enqueued_bucket.bucket;
                if self.schedules_retries {
                    tracing::warn!(
                        bucket_id = %bucket.bucket_id,
                        worker_id = %dequeued.worker_id,
                        reason = %reason,
                        "Stuck bucket reenqueued"
                    );
                    self.enqueue_first(bucket.clone());
                } else {
                    tracing::warn!(
                        bucket_id = %bucket.bucket_id,
                        worker_id = %dequeued.worker_id,
                        reason = %reason,
                        "Stuck bucket of deleted job dropped"
                    );
                    self.fail_dropped_bucket(&bucket, &dequeued.worker_id, reason);
                }
                StuckBucket {
                    reason,
                    bucket,
                    worker_id: dequeued.worker_id,
                    request_id: dequeued.request_id,
                }
            })
            .collect()
    }

    fn fail_dropped_bucket(
        &mut self,
        bucket: &Bucket,
        worker_id: &WorkerId,
        reason: StuckBucketReason,
    ) {
        for entry in &bucket.entries {
            let result =
                TestEntryResult::crashed(entry.clone(), format!("bucket dropped: {reason}"));
            let attempts = self.history.register_attempt(
                &bucket.lineage_id,
                entry,
                worker_id,
                &bucket.bucket_id,
                result.outcome,
            );
            if self
                .history
                .finalize(&bucket.lineage_id, entry, TestOutcome::Failed)
            {
                self.final_results.push(FinalTestEntryResult {
                    test_entry: entry.clone(),
                    outcome: TestOutcome::Failed,
                    attempts,
                    last_result: result,
                });
            }
        }
    }

    /// Drops all waiting buckets and stops scheduling retries. Outstanding
    /// buckets stay so their results can still be accepted.
    pub fn remove_all_enqueued_buckets(&mut self) -> usize {
        self.schedules_retries = false;
        let removed = self.enqueued.len();
        self.enqueued.clear();
        removed
    }

    pub fn running_queue_state(&self) -> RunningQueueState {
        RunningQueueState {
            enqueued_bucket_count: self.enqueued.len(),
            dequeued_bucket_count: self.dequeued.len(),
            enqueued_tests: self.enqueued.iter().map(|e| e.bucket.entries.len()).sum(),
            dequeued_tests: self.dequeued.iter().map(|d| d.bucket().entries.len()).sum(),
        }
    }

    pub fn is_depleted(&self) -> bool {
        self.enqueued.is_empty() && self.dequeued.is_empty()
    }

    pub fn dequeued_buckets(&self) -> &[DequeuedBucket] {
        &self.dequeued
    }

    pub fn testing_results(&self) -> &[TestingResult] {
        &self.testing_results
    }

    pub fn final_results(&self) -> &[FinalTestEntryResult] {
        &self.final_results
    }

    pub fn history(&self) -> &TestHistoryTracker {
        &self.history
    }
}
