//! Request and response bodies of the queue server's HTTP API.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::{
    DequeuedBucket, JobId, PayloadSignature, RequestId, TestEntryConfiguration, TestingResult,
    WorkerCapability, WorkerId,
};
use crate::scheduler::{DequeueResult, PrioritizedJob, ScheduleStrategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterWorkerPayload {
    pub worker_id: WorkerId,
    #[serde(default)]
    pub capabilities: BTreeSet<WorkerCapability>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DequeueBucketPayload {
    pub request_id: RequestId,
    pub worker_id: WorkerId,
    pub payload_signature: PayloadSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "caseId", rename_all = "camelCase")]
pub enum DequeueBucketResponse {
    #[serde(rename_all = "camelCase")]
    BucketDequeued { dequeued_bucket: DequeuedBucket },
    #[serde(rename_all = "camelCase")]
    CheckAgainLater { check_after_millis: u64 },
    QueueIsEmpty,
}

impl From<DequeueResult> for DequeueBucketResponse {
    fn from(result: DequeueResult) -> Self {
        match result {
            DequeueResult::Dequeued(dequeued_bucket) => {
                DequeueBucketResponse::BucketDequeued { dequeued_bucket }
            }
            DequeueResult::CheckAgainLater { after } => DequeueBucketResponse::CheckAgainLater {
                check_after_millis: after.as_millis() as u64,
            },
            DequeueResult::QueueIsEmpty => DequeueBucketResponse::QueueIsEmpty,
        }
    }
}

impl From<DequeueBucketResponse> for DequeueResult {
    fn from(response: DequeueBucketResponse) -> Self {
        match response {
            DequeueBucketResponse::BucketDequeued { dequeued_bucket } => {
                DequeueResult::Dequeued(dequeued_bucket)
            }
            DequeueBucketResponse::CheckAgainLater { check_after_millis } => {
                DequeueResult::CheckAgainLater {
                    after: std::time::Duration::from_millis(check_after_millis),
                }
            }
            DequeueBucketResponse::QueueIsEmpty => DequeueResult::QueueIsEmpty,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketResultPayload {
    pub request_id: RequestId,
    pub worker_id: WorkerId,
    pub payload_signature: PayloadSignature,
    pub testing_result: TestingResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerIdPayload {
    pub worker_id: WorkerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobIdPayload {
    pub job_id: JobId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleTestsPayload {
    pub prioritized_job: PrioritizedJob,
    #[serde(default)]
    pub schedule_strategy: ScheduleStrategy,
    pub test_entry_configurations: Vec<TestEntryConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleTestsResponse {
    pub job_id: JobId,
    pub bucket_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleWorkersSharingPayload {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkersToUtilizePayload {
    pub workers: BTreeSet<WorkerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueVersionResponse {
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
