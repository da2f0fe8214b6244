use thiserror::Error;

use crate::models::{JobId, RequestId, WorkerId};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("No outstanding bucket for request {request_id} from worker {worker_id}")]
    UnknownBucket {
        request_id: RequestId,
        worker_id: WorkerId,
    },

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {0} has been deleted")]
    JobAlreadyDeleted(JobId),

    #[error("Worker {0} is not registered")]
    WorkerNotRegistered(WorkerId),

    #[error("Payload signature does not match")]
    PayloadSignatureMismatch,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Stable machine-readable name, used as the `error` field of API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            QueueError::UnknownBucket { .. } => "unknownBucket",
            QueueError::JobNotFound(_) => "jobNotFound",
            QueueError::JobAlreadyDeleted(_) => "jobAlreadyDeleted",
            QueueError::WorkerNotRegistered(_) => "workerNotRegistered",
            QueueError::PayloadSignatureMismatch => "payloadSignatureMismatch",
            QueueError::InvalidConfig(_) => "invalidConfig",
            QueueError::Io(_) => "io",
            QueueError::Json(_) => "json",
            QueueError::Http(_) => "http",
            QueueError::Internal(_) => "internal",
        }
    }
}

impl From<reqwest::Error> for QueueError {
    fn from(e: reqwest::Error) -> Self {
        QueueError::Http(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
