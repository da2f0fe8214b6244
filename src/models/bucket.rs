use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::capability::WorkerCapabilityRequirement;
use crate::models::ids::{BucketId, RequestId, WorkerId};
use crate::models::test_entry::TestEntry;

/// Tool versions and resource classes a bucket runs with.
pub type ToolResources = BTreeMap<String, String>;

/// Atomic unit of schedulable work. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub bucket_id: BucketId,
    /// Id of the bucket this one was split off from by retries. A bucket
    /// created by the splitter is its own lineage.
    pub lineage_id: BucketId,
    pub entries: Vec<TestEntry>,
    pub test_destination: String,
    #[serde(default)]
    pub requirements: BTreeSet<WorkerCapabilityRequirement>,
    #[serde(default)]
    pub tool_resources: ToolResources,
}

impl Bucket {
    pub fn new(
        entries: Vec<TestEntry>,
        test_destination: impl Into<String>,
        requirements: BTreeSet<WorkerCapabilityRequirement>,
        tool_resources: ToolResources,
    ) -> Self {
        let bucket_id = BucketId::generate();
        Self {
            lineage_id: bucket_id.clone(),
            bucket_id,
            entries,
            test_destination: test_destination.into(),
            requirements,
            tool_resources,
        }
    }

    /// A new bucket with the same execution requirements but different entries.
    /// Used to schedule retries of a subset of entries.
    pub fn with_entries(&self, entries: Vec<TestEntry>) -> Self {
        Self {
            bucket_id: BucketId::generate(),
            lineage_id: self.lineage_id.clone(),
            entries,
            test_destination: self.test_destination.clone(),
            requirements: self.requirements.clone(),
            tool_resources: self.tool_resources.clone(),
        }
    }
}

/// A bucket sitting in a job queue, waiting to be handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueuedBucket {
    pub bucket: Bucket,
    pub enqueue_timestamp: DateTime<Utc>,
    pub unique_identifier: String,
}

impl EnqueuedBucket {
    pub fn new(bucket: Bucket) -> Self {
        Self {
            bucket,
            enqueue_timestamp: Utc::now(),
            unique_identifier: Uuid::new_v4().to_string(),
        }
    }
}

/// A bucket claimed by `(worker_id, request_id)` and not yet resulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DequeuedBucket {
    pub enqueued_bucket: EnqueuedBucket,
    pub worker_id: WorkerId,
    pub request_id: RequestId,
}

impl DequeuedBucket {
    pub fn bucket(&self) -> &Bucket {
        &self.enqueued_bucket.bucket
    }

    pub fn bucket_id(&self) -> &BucketId {
        &self.enqueued_bucket.bucket.bucket_id
    }

    pub fn is_claimed_by(&self, request_id: &RequestId, worker_id: &WorkerId) -> bool {
        &self.request_id == request_id && &self.worker_id == worker_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StuckBucketReason {
    /// The owning worker went silent.
    BucketLost,
    /// The owning worker was disabled by an operator.
    WorkerIsBlocked,
    /// The owning worker is not known to the aliveness tracker.
    WorkerIsInvalid,
}

impl fmt::Display for StuckBucketReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StuckBucketReason::BucketLost => write!(f, "bucket lost"),
            StuckBucketReason::WorkerIsBlocked => write!(f, "worker is blocked"),
            StuckBucketReason::WorkerIsInvalid => write!(f, "worker is invalid"),
        }
    }
}

/// A dequeued bucket reclaimed from a worker that is no longer alive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckBucket {
    pub reason: StuckBucketReason,
    pub bucket: Bucket,
    pub worker_id: WorkerId,
    pub request_id: RequestId,
}
