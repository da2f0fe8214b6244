use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::error::Result;
use crate::models::{StuckBucket, TestEntryConfiguration};
use crate::scheduler::aliveness::WorkerAlivenessTracker;
use crate::scheduler::container::MultipleQueuesContainer;
use crate::scheduler::job::PrioritizedJob;
use crate::scheduler::queue::BucketQueue;
use crate::scheduler::splitter::{BucketSplitInfo, BucketSplitter};

/// Splits scheduled tests into buckets and hands them to the container.
#[derive(Debug, Clone)]
pub struct TestsEnqueuer {
    container: Arc<MultipleQueuesContainer>,
    number_of_retries: u32,
    check_again_interval: Duration,
}

impl TestsEnqueuer {
    pub fn new(
        container: Arc<MultipleQueuesContainer>,
        number_of_retries: u32,
        check_again_interval: Duration,
    ) -> Self {
        Self {
            container,
            number_of_retries,
            check_again_interval,
        }
    }

    /// Returns the number of buckets created.
    pub async fn enqueue(
        &self,
        splitter: &dyn BucketSplitter,
        configurations: &[TestEntryConfiguration],
        split_info: &BucketSplitInfo,
        prioritized_job: PrioritizedJob,
    ) -> Result<usize> {
        let buckets = splitter.generate(configurations, split_info);
        let bucket_count = buckets.len();
        let job_id = prioritized_job.job_id.clone();

        let (number_of_retries, check_again_interval) =
            (self.number_of_retries, self.check_again_interval);
        self.container
            .enqueue(prioritized_job, buckets, || {
                BucketQueue::new(number_of_retries, check_again_interval)
            })
            .await?;

        tracing::info!(
            job_id = %job_id,
            tests = configurations.len(),
            buckets = bucket_count,
            workers = split_info.number_of_workers,
            "Tests scheduled"
        );
        Ok(bucket_count)
    }
}

/// Reclaims buckets held by workers that are no longer fit to hold them.
#[derive(Debug, Clone)]
pub struct StuckBucketsReenqueuer {
    container: Arc<MultipleQueuesContainer>,
    aliveness: Arc<RwLock<WorkerAlivenessTracker>>,
}

impl StuckBucketsReenqueuer {
    pub fn new(
        container: Arc<MultipleQueuesContainer>,
        aliveness: Arc<RwLock<WorkerAlivenessTracker>>,
    ) -> Self {
        Self {
            container,
            aliveness,
        }
    }

    pub async fn reenqueue_stuck_buckets(&self) -> Vec<StuckBucket> {
        let stuck = self.container.reenqueue_stuck_buckets(&self.aliveness).await;
        if !stuck.is_empty() {
            tracing::warn!(count = stuck.len(), "Stuck buckets reclaimed");
        }
        stuck
    }
}
