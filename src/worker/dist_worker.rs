use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{QueueError, Result};
use crate::models::{
    DequeuedBucket, PayloadSignature, RequestId, TestingResult, WorkerCapability, WorkerId,
};
use crate::scheduler::DequeueResult;
use crate::worker::client::QueueClient;
use crate::worker::executor::BucketExecutor;
use crate::worker::heartbeat::HeartbeatSender;

const DEFAULT_TRANSPORT_RETRY_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1000);
const RESULT_SUBMISSION_ATTEMPTS: u32 = 5;

/// A worker process: registers with the queue, then keeps every parallel
/// slot busy with buckets until cancelled.
pub struct DistWorker {
    worker_id: WorkerId,
    capabilities: BTreeSet<WorkerCapability>,
    client: Arc<dyn QueueClient>,
    executor: Arc<dyn BucketExecutor>,
    transport_retry_delay: Duration,
    max_jitter: Duration,
}

/// One polling loop; a worker runs one per parallel bucket.
struct Slot {
    index: u32,
    worker_id: WorkerId,
    signature: PayloadSignature,
    client: Arc<dyn QueueClient>,
    executor: Arc<dyn BucketExecutor>,
    transport_retry_delay: Duration,
    max_jitter: Duration,
    processed: Arc<AtomicUsize>,
}

impl DistWorker {
    pub fn new(
        worker_id: impl Into<WorkerId>,
        client: Arc<dyn QueueClient>,
        executor: Arc<dyn BucketExecutor>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            capabilities: BTreeSet::new(),
            client,
            executor,
            transport_retry_delay: DEFAULT_TRANSPORT_RETRY_DELAY,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }

    pub fn with_capabilities(mut self, capabilities: BTreeSet<WorkerCapability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_transport_retry_delay(mut self, delay: Duration) -> Self {
        self.transport_retry_delay = delay;
        self
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Runs until `cancel` fires and every slot has finished its current
    /// bucket. Returns the number of buckets executed.
    pub async fn run(self, cancel: CancellationToken) -> Result<usize> {
        let registration = self
            .client
            .register_worker(&self.worker_id, &self.capabilities)
            .await?;
        let configuration = registration.worker_configuration;
        tracing::info!(
            worker_id = %self.worker_id,
            slots = configuration.number_of_parallel_buckets,
            "Worker registered with queue"
        );

        let heartbeat_cancel = cancel.child_token();
        let heartbeat = {
            let sender = HeartbeatSender::new(configuration.report_alive_interval());
            let client = self.client.clone();
            let worker_id = self.worker_id.clone();
            let token = heartbeat_cancel.clone();
            tokio::spawn(async move { sender.run(client, worker_id, token).await })
        };

        let processed = Arc::new(AtomicUsize::new(0));
        let slots_cancel = cancel.child_token();
        let mut slots = JoinSet::new();
        for index in 0..configuration.number_of_parallel_buckets.max(1) {
            let slot = Slot {
                index,
                worker_id: self.worker_id.clone(),
                signature: registration.payload_signature.clone(),
                client: self.client.clone(),
                executor: self.executor.clone(),
                transport_retry_delay: self.transport_retry_delay,
                max_jitter: self.max_jitter,
                processed: processed.clone(),
            };
            slots.spawn(slot.run(slots_cancel.clone()));
        }

        let mut outcome = Ok(());
        while let Some(joined) = slots.join_next().await {
            let failure = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(e) => QueueError::Internal(format!("worker slot panicked: {e}")),
            };
            // A slot the queue rejected takes the other slots down with it.
            slots_cancel.cancel();
            if outcome.is_ok() {
                outcome = Err(failure);
            }
        }

        heartbeat_cancel.cancel();
        if let Err(e) = heartbeat.await {
            tracing::warn!(error = %e, "Heartbeat task failed");
        }

        let processed = processed.load(Ordering::SeqCst);
        tracing::info!(worker_id = %self.worker_id, buckets = processed, "Worker stopped");
        outcome.map(|_| processed)
    }
}

impl Slot {
    async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut request_id = RequestId::generate();

        while !cancel.is_cancelled() {
            let result = self
                .client
                .dequeue_bucket(&request_id, &self.worker_id, &self.signature)
                .await;

            match result {
                Ok(DequeueResult::Dequeued(dequeued)) => {
                    self.process(dequeued).await;
                    request_id = RequestId::generate();
                }
                Ok(DequeueResult::CheckAgainLater { after }) => {
                    request_id = RequestId::generate();
                    self.sleep(after + self.jitter(), &cancel).await;
                }
                Ok(DequeueResult::QueueIsEmpty) => {
                    request_id = RequestId::generate();
                    self.sleep(self.transport_retry_delay + self.jitter(), &cancel)
                        .await;
                }
                Err(e @ (QueueError::PayloadSignatureMismatch | QueueError::WorkerNotRegistered(_))) => {
                    tracing::error!(worker_id = %self.worker_id, slot = self.index, error = %e, "Queue rejected worker");
                    return Err(e);
                }
                Err(e) => {
                    // Keep the request id: a retried poll gets back a bucket
                    // the server handed out but we never received.
                    tracing::warn!(
                        worker_id = %self.worker_id,
                        slot = self.index,
                        request_id = %request_id,
                        error = %e,
                        "Failed to poll for a bucket"
                    );
                    self.sleep(self.transport_retry_delay, &cancel).await;
                }
            }
        }
        Ok(())
    }

    async fn process(&self, dequeued: DequeuedBucket) {
        let bucket_id = dequeued.bucket_id().clone();
        tracing::info!(
            worker_id = %self.worker_id,
            slot = self.index,
            bucket_id = %bucket_id,
            tests = dequeued.bucket().entries.len(),
            "Bucket received"
        );

        let testing_result = {
            let executor = self.executor.clone();
            let bucket = dequeued.bucket().clone();
            match tokio::spawn(async move { executor.execute(&bucket).await }).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(bucket_id = %bucket_id, error = %e, "Bucket executor failed");
                    TestingResult::all_crashed(dequeued.bucket(), &format!("executor failed: {e}"))
                }
            }
        };
        self.processed.fetch_add(1, Ordering::SeqCst);

        for attempt in 1..=RESULT_SUBMISSION_ATTEMPTS {
            let sent = self
                .client
                .send_bucket_result(
                    testing_result.clone(),
                    &dequeued.request_id,
                    &self.worker_id,
                    &self.signature,
                )
                .await;

            match sent {
                Ok(job_id) => {
                    tracing::info!(bucket_id = %bucket_id, job_id = %job_id, "Bucket result sent");
                    return;
                }
                Err(QueueError::UnknownBucket { .. }) => {
                    tracing::warn!(
                        bucket_id = %bucket_id,
                        "Queue no longer expects this bucket, abandoning its result"
                    );
                    return;
                }
                Err(e) if attempt < RESULT_SUBMISSION_ATTEMPTS => {
                    tracing::warn!(bucket_id = %bucket_id, attempt, error = %e, "Failed to send bucket result, retrying");
                    tokio::time::sleep(self.transport_retry_delay).await;
                }
                Err(e) => {
                    tracing::error!(bucket_id = %bucket_id, error = %e, "Giving up on bucket result");
                }
            }
        }
    }

    fn jitter(&self) -> Duration {
        let max_millis = self.max_jitter.as_millis() as u64;
        if max_millis == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_millis))
    }

    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }
}
