//! Value types shared by the queue engine, the HTTP API and workers.

pub mod bucket;
pub mod capability;
pub mod ids;
pub mod test_entry;
pub mod testing_result;

pub use bucket::{
    Bucket, DequeuedBucket, EnqueuedBucket, StuckBucket, StuckBucketReason, ToolResources,
};
pub use capability::{WorkerCapability, WorkerCapabilityConstraint, WorkerCapabilityRequirement};
pub use ids::{BucketId, JobId, PayloadSignature, RequestId, WorkerId};
pub use test_entry::{TestEntry, TestEntryConfiguration};
pub use testing_result::{TestEntryResult, TestOutcome, TestingResult};
