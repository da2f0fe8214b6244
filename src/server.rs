use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{QueueServerConfig, TerminationPolicy, WorkerConfiguration};
use crate::error::{QueueError, Result};
use crate::models::{
    BucketId, JobId, PayloadSignature, RequestId, StuckBucket, TestEntryConfiguration,
    TestingResult, WorkerCapability, WorkerId,
};
use crate::scheduler::capabilities::WorkerCapabilitiesStorage;
use crate::scheduler::pollers;
use crate::scheduler::utilization::WorkerUtilization;
use crate::scheduler::{
    AcceptSummary, BucketSplitInfo, DequeueContext, DequeueResult, JobResults, JobState,
    MultipleQueuesContainer, PrioritizedJob, RunningQueueState, ScheduleStrategy,
    StuckBucketsReenqueuer, TestsEnqueuer, WorkerAliveness, WorkerAlivenessTracker,
};

/// Returned to a worker when it registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRegistration {
    pub worker_configuration: WorkerConfiguration,
    pub payload_signature: PayloadSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedBucketResult {
    pub job_id: JobId,
    pub bucket_id: BucketId,
    pub summary: AcceptSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub worker_id: WorkerId,
    pub aliveness: WorkerAliveness,
    /// Allowed to pull buckets right now: alive and, with sharing enabled,
    /// among the workers to utilize.
    pub permitted: bool,
}

/// The queue server's state and every operation it offers.
///
/// All shared state lives here; the HTTP layer and the in-process worker
/// client both call into one `Arc<QueueServer>`.
pub struct QueueServer {
    config: QueueServerConfig,
    payload_signature: PayloadSignature,
    container: Arc<MultipleQueuesContainer>,
    aliveness: Arc<RwLock<WorkerAlivenessTracker>>,
    capabilities: RwLock<WorkerCapabilitiesStorage>,
    utilization: RwLock<WorkerUtilization>,
    enqueuer: TestsEnqueuer,
}

impl QueueServer {
    pub fn new(config: QueueServerConfig) -> Self {
        let container = Arc::new(MultipleQueuesContainer::new(
            config.max_deleted_jobs,
            config.check_again_time_interval(),
        ));
        let enqueuer = TestsEnqueuer::new(
            container.clone(),
            config.number_of_retries,
            config.check_again_time_interval(),
        );

        Self {
            payload_signature: PayloadSignature::generate(),
            aliveness: Arc::new(RwLock::new(WorkerAlivenessTracker::new(
                config.worker_alive_timeout(),
            ))),
            capabilities: RwLock::new(WorkerCapabilitiesStorage::new()),
            utilization: RwLock::new(WorkerUtilization::new()),
            container,
            enqueuer,
            config,
        }
    }

    pub fn config(&self) -> &QueueServerConfig {
        &self.config
    }

    pub fn payload_signature(&self) -> &PayloadSignature {
        &self.payload_signature
    }

    pub fn queue_version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Spawns the background pollers. The idle-termination poller cancels
    /// `shutdown` itself when the termination policy asks for it.
    pub fn start_pollers(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = vec![
            pollers::spawn_aliveness_poller(
                self.aliveness.clone(),
                self.config.aliveness_polling_interval(),
                shutdown.clone(),
            ),
            pollers::spawn_stuck_buckets_poller(
                StuckBucketsReenqueuer::new(self.container.clone(), self.aliveness.clone()),
                self.config.stuck_buckets_polling_interval(),
                shutdown.clone(),
            ),
            pollers::spawn_metrics_poller(
                self.aliveness.clone(),
                self.container.clone(),
                self.config.aliveness_metric_report_interval(),
                shutdown.clone(),
            ),
        ];

        if let TerminationPolicy::AfterBeingIdle { period_secs } = self.config.termination_policy {
            handles.push(pollers::spawn_idle_termination(
                self.container.clone(),
                std::time::Duration::from_secs(period_secs),
                shutdown,
            ));
        }

        handles
    }

    fn verify_signature(&self, signature: &PayloadSignature) -> Result<()> {
        if signature != &self.payload_signature {
            return Err(QueueError::PayloadSignatureMismatch);
        }
        Ok(())
    }

    // Workers

    pub async fn register_worker(
        &self,
        worker_id: WorkerId,
        capabilities: BTreeSet<WorkerCapability>,
        address: Option<String>,
    ) -> WorkerRegistration {
        tracing::info!(
            worker_id = %worker_id,
            address = address.as_deref().unwrap_or("-"),
            capabilities = capabilities.len(),
            "Worker registration"
        );
        self.capabilities
            .write()
            .await
            .set(worker_id.clone(), capabilities);
        self.aliveness.write().await.register_worker(worker_id.clone());

        WorkerRegistration {
            worker_configuration: self.config.worker_configuration(&worker_id),
            payload_signature: self.payload_signature.clone(),
        }
    }

    pub async fn report_alive(&self, worker_id: &WorkerId) -> Result<()> {
        self.aliveness.write().await.mark_alive(worker_id)
    }

    pub async fn dequeue_bucket(
        &self,
        request_id: RequestId,
        worker_id: WorkerId,
        signature: &PayloadSignature,
    ) -> Result<DequeueResult> {
        self.verify_signature(signature)?;
        self.aliveness.write().await.mark_alive(&worker_id)?;

        let Some(ctx) = self.dequeue_context(request_id, worker_id).await else {
            return Ok(DequeueResult::CheckAgainLater {
                after: self.config.check_again_time_interval(),
            });
        };

        Ok(self.container.dequeue(&ctx, &self.aliveness).await)
    }

    /// `None` when the worker may not pull right now.
    async fn dequeue_context(
        &self,
        request_id: RequestId,
        worker_id: WorkerId,
    ) -> Option<DequeueContext> {
        let alive_workers = self.aliveness.read().await.alive_workers();
        let utilization = self.utilization.read().await;
        let capabilities = self.capabilities.read().await;

        let pullable_workers: HashMap<WorkerId, BTreeSet<WorkerCapability>> = alive_workers
            .into_iter()
            .filter(|id| utilization.is_permitted(id))
            .map(|id| {
                let caps = capabilities.get(&id);
                (id, caps)
            })
            .collect();

        let Some(worker_capabilities) = pullable_workers.get(&worker_id).cloned() else {
            tracing::debug!(worker_id = %worker_id, "Worker is not permitted to pull buckets");
            return None;
        };

        Some(DequeueContext {
            request_id,
            worker_id,
            capabilities: worker_capabilities,
            pullable_workers,
        })
    }

    pub async fn accept_result(
        &self,
        testing_result: TestingResult,
        request_id: &RequestId,
        worker_id: &WorkerId,
        signature: &PayloadSignature,
    ) -> Result<AcceptedBucketResult> {
        self.verify_signature(signature)?;
        self.aliveness.write().await.mark_alive(worker_id)?;

        let (job_id, accepted) = self
            .container
            .accept(testing_result, request_id, worker_id)
            .await?;
        let bucket_id = accepted.dequeued_bucket.bucket_id().clone();
        self.aliveness
            .write()
            .await
            .bucket_processed(worker_id, &bucket_id);

        Ok(AcceptedBucketResult {
            job_id,
            bucket_id,
            summary: accepted.summary,
        })
    }

    pub async fn enable_worker(&self, worker_id: &WorkerId) -> Result<()> {
        self.aliveness.write().await.enable_worker(worker_id)
    }

    pub async fn disable_worker(&self, worker_id: &WorkerId) -> Result<()> {
        self.aliveness.write().await.disable_worker(worker_id)
    }

    pub async fn worker_status(&self) -> Vec<WorkerStatus> {
        let workers = self.aliveness.read().await.all_workers();
        let utilization = self.utilization.read().await;
        workers
            .into_iter()
            .map(|(worker_id, aliveness)| WorkerStatus {
                permitted: aliveness.is_alive() && utilization.is_permitted(&worker_id),
                worker_id,
                aliveness,
            })
            .collect()
    }

    pub async fn has_any_alive_worker(&self) -> bool {
        self.aliveness.read().await.has_any_alive_worker()
    }

    pub async fn toggle_workers_sharing(&self, enabled: bool) {
        self.utilization.write().await.toggle_sharing(enabled);
    }

    pub async fn set_workers_to_utilize(&self, workers: BTreeSet<WorkerId>) {
        self.utilization.write().await.set_workers_to_utilize(workers);
    }

    pub async fn workers_to_utilize(&self) -> BTreeSet<WorkerId> {
        self.utilization.read().await.workers_to_utilize().clone()
    }

    // Jobs

    /// Splits and enqueues tests into the job. Returns the number of buckets.
    pub async fn schedule_tests(
        &self,
        prioritized_job: PrioritizedJob,
        strategy: ScheduleStrategy,
        configurations: Vec<TestEntryConfiguration>,
    ) -> Result<usize> {
        let split_info = BucketSplitInfo {
            number_of_workers: self.aliveness.read().await.alive_workers().len(),
            tool_resources: self.config.tool_resources.clone(),
        };
        self.enqueuer
            .enqueue(&strategy, &configurations, &split_info, prioritized_job)
            .await
    }

    pub async fn job_state(&self, job_id: &JobId) -> Result<JobState> {
        self.container.job_state(job_id).await
    }

    pub async fn job_results(&self, job_id: &JobId) -> Result<JobResults> {
        self.container.job_results(job_id).await
    }

    pub async fn delete_job(&self, job_id: &JobId) -> Result<()> {
        self.container.delete_job(job_id).await
    }

    pub async fn job_states(&self) -> Vec<JobState> {
        self.container.job_states().await
    }

    pub async fn running_queue_state(&self) -> RunningQueueState {
        self.container.running_queue_state().await
    }

    // Sweeps, also run by the background pollers.

    pub async fn mark_silent_workers(&self) -> Vec<WorkerId> {
        self.aliveness.write().await.mark_silent_workers()
    }

    pub async fn reenqueue_stuck_buckets(&self) -> Vec<StuckBucket> {
        self.container.reenqueue_stuck_buckets(&self.aliveness).await
    }
}
