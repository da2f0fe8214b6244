//! Worker side of the queue.
//!
//! - [`DistWorker`]: registers with the queue server and runs one polling
//!   loop per parallel bucket slot
//! - [`QueueClient`]: how a worker reaches the server, in process
//!   ([`LocalQueueClient`]) or over HTTP ([`HttpQueueClient`])
//! - [`BucketExecutor`]: runs the tests of a bucket; [`ProcessBucketExecutor`]
//!   runs an external program per test
//! - [`heartbeat`]: periodic aliveness reports while buckets execute
//!
//! A worker never blocks on the server. When there is nothing to do it
//! sleeps for the interval the server asked for, plus jitter, and polls again.

pub mod client;
pub mod dist_worker;
pub mod executor;
pub mod heartbeat;

pub use client::{HttpQueueClient, LocalQueueClient, QueueClient};
pub use dist_worker::DistWorker;
pub use executor::{BucketExecutor, ProcessBucketExecutor};
