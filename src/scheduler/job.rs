use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::models::{JobId, TestingResult};
use crate::scheduler::queue::{BucketQueue, FinalTestEntryResult, RunningQueueState};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrioritizedJob {
    pub job_id: JobId,
    #[serde(default)]
    pub priority: u32,
}

impl PrioritizedJob {
    pub fn new(job_id: impl Into<JobId>, priority: u32) -> Self {
        Self {
            job_id: job_id.into(),
            priority,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Running,
    Deleted,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// A job and its bucket queue. The mutex is the per-job critical section:
/// every enqueue, dequeue, accept and stuck sweep for the job goes through it.
#[derive(Debug)]
pub struct JobQueue {
    pub prioritized_job: PrioritizedJob,
    pub created_at: DateTime<Utc>,
    pub bucket_queue: Mutex<BucketQueue>,
}

impl JobQueue {
    pub fn new(prioritized_job: PrioritizedJob, bucket_queue: BucketQueue) -> Self {
        Self {
            prioritized_job,
            created_at: Utc::now(),
            bucket_queue: Mutex::new(bucket_queue),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.prioritized_job.job_id
    }

    pub fn priority(&self) -> u32 {
        self.prioritized_job.priority
    }

    pub async fn state(&self, status: JobStatus) -> JobState {
        let queue_state = self.bucket_queue.lock().await.running_queue_state();
        JobState {
            job_id: self.job_id().clone(),
            priority: self.priority(),
            status,
            is_depleted: queue_state.is_depleted(),
            queue_state,
            created_at: self.created_at,
        }
    }

    pub async fn results(&self) -> JobResults {
        let queue = self.bucket_queue.lock().await;
        JobResults {
            job_id: self.job_id().clone(),
            final_results: queue.final_results().to_vec(),
            testing_results: queue.testing_results().to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub job_id: JobId,
    pub priority: u32,
    pub status: JobStatus,
    pub is_depleted: bool,
    pub queue_state: RunningQueueState,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResults {
    pub job_id: JobId,
    pub final_results: Vec<FinalTestEntryResult>,
    pub testing_results: Vec<TestingResult>,
}
