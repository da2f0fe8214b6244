use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::error::{QueueError, Result};
use crate::models::{Bucket, JobId, RequestId, StuckBucket, TestingResult, WorkerId};
use crate::scheduler::aliveness::WorkerAlivenessTracker;
use crate::scheduler::job::{JobQueue, JobResults, JobState, JobStatus, PrioritizedJob};
use crate::scheduler::queue::{
    BucketQueue, BucketQueueAcceptResult, DequeueContext, DequeueResult, RunningQueueState,
};

#[derive(Debug, Default)]
struct Queues {
    /// Ordered by descending priority, then creation order.
    running: Vec<Arc<JobQueue>>,
    /// Oldest first; trimmed to `max_deleted_jobs`.
    deleted: VecDeque<Arc<JobQueue>>,
}

impl Queues {
    fn running(&self, job_id: &JobId) -> Option<&Arc<JobQueue>> {
        self.running.iter().find(|q| q.job_id() == job_id)
    }

    fn deleted(&self, job_id: &JobId) -> Option<&Arc<JobQueue>> {
        self.deleted.iter().find(|q| q.job_id() == job_id)
    }

    fn insert_running(&mut self, job_queue: Arc<JobQueue>) {
        // Equal priorities keep creation order: insert after the last job
        // with the same or higher priority.
        let position = self
            .running
            .iter()
            .position(|q| q.priority() < job_queue.priority())
            .unwrap_or(self.running.len());
        self.running.insert(position, job_queue);
    }
}

/// Running and deleted job queues, and the routing of worker requests to them.
///
/// The outer lock only guards membership. Requests clone the `Arc`s they need
/// under a read lock and then work on each job under its own mutex, so lock
/// order is always container, then job, then worker aliveness.
#[derive(Debug)]
pub struct MultipleQueuesContainer {
    queues: RwLock<Queues>,
    max_deleted_jobs: usize,
    check_again_interval: Duration,
}

impl MultipleQueuesContainer {
    pub fn new(max_deleted_jobs: usize, check_again_interval: Duration) -> Self {
        Self {
            queues: RwLock::new(Queues::default()),
            max_deleted_jobs,
            check_again_interval,
        }
    }

    pub async fn add_running_job_queue(&self, job_queue: JobQueue) -> Arc<JobQueue> {
        let job_queue = Arc::new(job_queue);
        self.queues.write().await.insert_running(job_queue.clone());
        tracing::info!(
            job_id = %job_queue.job_id(),
            priority = job_queue.priority(),
            "Running job added"
        );
        job_queue
    }

    pub async fn add_deleted_job_queues(&self, job_queues: Vec<JobQueue>) {
        let mut queues = self.queues.write().await;
        for job_queue in job_queues {
            queues.deleted.push_back(Arc::new(job_queue));
        }
        self.trim_deleted(&mut queues);
    }

    fn trim_deleted(&self, queues: &mut Queues) {
        while queues.deleted.len() > self.max_deleted_jobs {
            if let Some(evicted) = queues.deleted.pop_front() {
                tracing::debug!(job_id = %evicted.job_id(), "Deleted job evicted from history");
            }
        }
    }

    /// Adds buckets to the job, creating it as a running job if it does not
    /// exist yet. Fails for a job that was deleted.
    pub async fn enqueue<F>(
        &self,
        prioritized_job: PrioritizedJob,
        buckets: Vec<Bucket>,
        new_bucket_queue: F,
    ) -> Result<()>
    where
        F: FnOnce() -> BucketQueue,
    {
        let mut queues = self.queues.write().await;
        if queues.deleted(&prioritized_job.job_id).is_some() {
            return Err(QueueError::JobAlreadyDeleted(prioritized_job.job_id));
        }

        if let Some(existing) = queues.running(&prioritized_job.job_id) {
            existing.bucket_queue.lock().await.enqueue(buckets);
            return Ok(());
        }

        let mut bucket_queue = new_bucket_queue();
        bucket_queue.enqueue(buckets);
        let job_queue = Arc::new(JobQueue::new(prioritized_job, bucket_queue));
        tracing::info!(
            job_id = %job_queue.job_id(),
            priority = job_queue.priority(),
            "Running job added"
        );
        queues.insert_running(job_queue);
        Ok(())
    }

    /// Moves a running job to the deleted set. Enqueued buckets are dropped;
    /// outstanding ones remain so their results can still be accepted.
    pub async fn delete_job(&self, job_id: &JobId) -> Result<()> {
        let mut queues = self.queues.write().await;
        let Some(position) = queues.running.iter().position(|q| q.job_id() == job_id) else {
            return Err(if queues.deleted(job_id).is_some() {
                QueueError::JobAlreadyDeleted(job_id.clone())
            } else {
                QueueError::JobNotFound(job_id.clone())
            });
        };

        let job_queue = queues.running.remove(position);
        let removed = job_queue
            .bucket_queue
            .lock()
            .await
            .remove_all_enqueued_buckets();
        tracing::info!(job_id = %job_id, removed_buckets = removed, "Job deleted");

        queues.deleted.push_back(job_queue);
        self.trim_deleted(&mut queues);
        Ok(())
    }

    async fn running_snapshot(&self) -> Vec<Arc<JobQueue>> {
        self.queues.read().await.running.clone()
    }

    async fn all_snapshot(&self) -> Vec<Arc<JobQueue>> {
        let queues = self.queues.read().await;
        queues
            .running
            .iter()
            .chain(queues.deleted.iter())
            .cloned()
            .collect()
    }

    /// Hands out a bucket from the first running job that has one for this
    /// worker. A repeated poll with the same request id gets the same bucket
    /// back, whichever job it came from.
    ///
    /// Membership stays read-locked and every running job stays locked for
    /// the whole call, so a job added meanwhile or a concurrent poll with the
    /// same request id cannot produce a second claim. The dequeued bucket is
    /// recorded as being processed by the worker before the job unlocks, so a
    /// concurrent stuck sweep never sees it unclaimed.
    pub async fn dequeue(
        &self,
        ctx: &DequeueContext,
        aliveness: &RwLock<WorkerAlivenessTracker>,
    ) -> DequeueResult {
        let queues = self.queues.read().await;
        let mut locked = Vec::with_capacity(queues.running.len());
        for job_queue in &queues.running {
            locked.push((job_queue, job_queue.bucket_queue.lock().await));
        }

        for (_, queue) in &locked {
            if let Some(previous) = queue.previously_dequeued_bucket(&ctx.request_id, &ctx.worker_id) {
                return DequeueResult::Dequeued(previous.clone());
            }
        }

        for (job_queue, queue) in &mut locked {
            if let DequeueResult::Dequeued(dequeued) = queue.dequeue_bucket(ctx) {
                aliveness
                    .write()
                    .await
                    .set_bucket_processing(&ctx.worker_id, dequeued.bucket_id());
                tracing::debug!(
                    job_id = %job_queue.job_id(),
                    bucket_id = %dequeued.bucket_id(),
                    "Bucket routed to worker"
                );
                return DequeueResult::Dequeued(dequeued);
            }
        }

        DequeueResult::CheckAgainLater {
            after: self.check_again_interval,
        }
    }

    /// Accepts a result in whichever job, running or deleted, holds the
    /// bucket dequeued by `(request_id, worker_id)`.
    pub async fn accept(
        &self,
        testing_result: TestingResult,
        request_id: &RequestId,
        worker_id: &WorkerId,
    ) -> Result<(JobId, BucketQueueAcceptResult)> {
        for job_queue in self.all_snapshot().await {
            let mut queue = job_queue.bucket_queue.lock().await;
            if queue.previously_dequeued_bucket(request_id, worker_id).is_some() {
                let accepted = queue.accept(testing_result, request_id, worker_id)?;
                return Ok((job_queue.job_id().clone(), accepted));
            }
        }

        Err(QueueError::UnknownBucket {
            request_id: request_id.clone(),
            worker_id: worker_id.clone(),
        })
    }

    /// Reclaims stuck buckets. Running jobs get them back at the head of
    /// their queue; deleted jobs drop them. Either way the bucket is taken off
    /// its old worker's in-flight set.
    pub async fn reenqueue_stuck_buckets(
        &self,
        aliveness: &RwLock<WorkerAlivenessTracker>,
    ) -> Vec<StuckBucket> {
        let mut stuck_buckets = Vec::new();
        for job_queue in self.all_snapshot().await {
            let mut queue = job_queue.bucket_queue.lock().await;
            let mut tracker = aliveness.write().await;
            let stuck = queue.reenqueue_stuck_buckets(|dequeued| {
                tracker.stuck_reason(&dequeued.worker_id, dequeued.bucket_id())
            });
            for s in &stuck {
                tracker.bucket_processed(&s.worker_id, &s.bucket.bucket_id);
            }
            if !stuck.is_empty() {
                tracing::info!(
                    job_id = %job_queue.job_id(),
                    count = stuck.len(),
                    "Stuck buckets reclaimed for job"
                );
            }
            stuck_buckets.extend(stuck);
        }
        stuck_buckets
    }

    pub async fn job_state(&self, job_id: &JobId) -> Result<JobState> {
        let (job_queue, status) = self.find(job_id).await?;
        Ok(job_queue.state(status).await)
    }

    pub async fn job_results(&self, job_id: &JobId) -> Result<JobResults> {
        let (job_queue, _) = self.find(job_id).await?;
        Ok(job_queue.results().await)
    }

    async fn find(&self, job_id: &JobId) -> Result<(Arc<JobQueue>, JobStatus)> {
        let queues = self.queues.read().await;
        if let Some(job_queue) = queues.running(job_id) {
            return Ok((job_queue.clone(), JobStatus::Running));
        }
        if let Some(job_queue) = queues.deleted(job_id) {
            return Ok((job_queue.clone(), JobStatus::Deleted));
        }
        Err(QueueError::JobNotFound(job_id.clone()))
    }

    /// Running job ids in routing order.
    pub async fn ongoing_job_ids(&self) -> Vec<JobId> {
        self.queues
            .read()
            .await
            .running
            .iter()
            .map(|q| q.job_id().clone())
            .collect()
    }

    pub async fn deleted_job_ids(&self) -> Vec<JobId> {
        self.queues
            .read()
            .await
            .deleted
            .iter()
            .map(|q| q.job_id().clone())
            .collect()
    }

    /// Combined queue state of all running jobs.
    pub async fn running_queue_state(&self) -> RunningQueueState {
        let mut state = RunningQueueState::default();
        for job_queue in self.running_snapshot().await {
            state = state.merge(job_queue.bucket_queue.lock().await.running_queue_state());
        }
        state
    }

    /// States of all running jobs in routing order.
    pub async fn job_states(&self) -> Vec<JobState> {
        let mut states = Vec::new();
        for job_queue in self.running_snapshot().await {
            states.push(job_queue.state(JobStatus::Running).await);
        }
        states
    }
}
