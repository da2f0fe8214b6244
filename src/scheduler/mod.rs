//! Bucket scheduling engine.
//!
//! - [`queue`]: per-job bucket queue (dequeue, accept, retries, stuck buckets)
//! - [`container`]: running and deleted jobs, request routing
//! - [`aliveness`]: worker heartbeat state machine
//! - [`history`]: per-test attempt ledger and retry budget
//! - [`capabilities`]: worker capability matching
//! - [`splitter`] / [`enqueuer`]: turning scheduled tests into buckets
//! - [`pollers`]: background sweeps

pub mod aliveness;
pub mod capabilities;
pub mod container;
pub mod enqueuer;
pub mod history;
pub mod job;
pub mod pollers;
pub mod queue;
pub mod splitter;
pub mod utilization;

pub use aliveness::{WorkerAliveness, WorkerAlivenessTracker};
pub use container::MultipleQueuesContainer;
pub use enqueuer::{StuckBucketsReenqueuer, TestsEnqueuer};
pub use job::{JobQueue, JobResults, JobState, JobStatus, PrioritizedJob};
pub use queue::{
    AcceptSummary, BucketQueue, BucketQueueAcceptResult, DequeueContext, DequeueResult,
    FinalTestEntryResult, RunningQueueState,
};
pub use splitter::{BucketSplitInfo, BucketSplitter, ScheduleStrategy};
