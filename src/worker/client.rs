use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::api::payloads::{
    BucketResultPayload, DequeueBucketPayload, DequeueBucketResponse, ErrorResponse,
    RegisterWorkerPayload, WorkerIdPayload,
};
use crate::error::{QueueError, Result};
use crate::models::{JobId, PayloadSignature, RequestId, TestingResult, WorkerCapability, WorkerId};
use crate::scheduler::DequeueResult;
use crate::server::{AcceptedBucketResult, QueueServer, WorkerRegistration};

/// The worker's view of the queue server.
#[async_trait]
pub trait QueueClient: Send + Sync {
    async fn register_worker(
        &self,
        worker_id: &WorkerId,
        capabilities: &BTreeSet<WorkerCapability>,
    ) -> Result<WorkerRegistration>;

    async fn dequeue_bucket(
        &self,
        request_id: &RequestId,
        worker_id: &WorkerId,
        signature: &PayloadSignature,
    ) -> Result<DequeueResult>;

    async fn send_bucket_result(
        &self,
        testing_result: TestingResult,
        request_id: &RequestId,
        worker_id: &WorkerId,
        signature: &PayloadSignature,
    ) -> Result<JobId>;

    async fn report_alive(&self, worker_id: &WorkerId) -> Result<()>;
}

/// Talks to a queue server living in the same process.
#[derive(Clone)]
pub struct LocalQueueClient {
    server: Arc<QueueServer>,
}

impl LocalQueueClient {
    pub fn new(server: Arc<QueueServer>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl QueueClient for LocalQueueClient {
    async fn register_worker(
        &self,
        worker_id: &WorkerId,
        capabilities: &BTreeSet<WorkerCapability>,
    ) -> Result<WorkerRegistration> {
        Ok(self
            .server
            .register_worker(worker_id.clone(), capabilities.clone(), None)
            .await)
    }

    async fn dequeue_bucket(
        &self,
        request_id: &RequestId,
        worker_id: &WorkerId,
        signature: &PayloadSignature,
    ) -> Result<DequeueResult> {
        self.server
            .dequeue_bucket(request_id.clone(), worker_id.clone(), signature)
            .await
    }

    async fn send_bucket_result(
        &self,
        testing_result: TestingResult,
        request_id: &RequestId,
        worker_id: &WorkerId,
        signature: &PayloadSignature,
    ) -> Result<JobId> {
        let accepted = self
            .server
            .accept_result(testing_result, request_id, worker_id, signature)
            .await?;
        Ok(accepted.job_id)
    }

    async fn report_alive(&self, worker_id: &WorkerId) -> Result<()> {
        self.server.report_alive(worker_id).await
    }
}

/// Talks to a remote queue server over its HTTP API.
#[derive(Debug, Clone)]
pub struct HttpQueueClient {
    base_url: String,
    address: Option<String>,
    http: reqwest::Client,
}

impl HttpQueueClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            address: None,
            http,
        })
    }

    /// Address reported to the server on registration, for operators.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    async fn send<P, R>(&self, path: &str, payload: &P, caller: Caller<'_>) -> Result<Option<R>>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.post(&url).json(payload).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if status.is_success() {
            return Ok(Some(response.json().await?));
        }

        let body = response.text().await.unwrap_or_default();
        Err(caller.error_from_response(status, &body))
    }

    async fn post<P, R>(&self, path: &str, payload: &P, caller: Caller<'_>) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.send(path, payload, caller)
            .await?
            .ok_or_else(|| QueueError::Http(format!("{path} returned no body")))
    }
}

/// Identity of the worker request, used to rebuild typed server errors.
#[derive(Clone, Copy)]
struct Caller<'a> {
    worker_id: &'a WorkerId,
    request_id: Option<&'a RequestId>,
}

impl Caller<'_> {
    /// Turns an error body back into the `QueueError` the server reported, so
    /// the worker can tell an abandoned bucket apart from a transport failure.
    fn error_from_response(&self, status: reqwest::StatusCode, body: &str) -> QueueError {
        let Ok(error) = serde_json::from_str::<ErrorResponse>(body) else {
            return QueueError::Http(format!("{status}: {body}"));
        };

        match (error.error.as_str(), self.request_id) {
            ("unknownBucket", Some(request_id)) => QueueError::UnknownBucket {
                request_id: request_id.clone(),
                worker_id: self.worker_id.clone(),
            },
            ("workerNotRegistered", _) => QueueError::WorkerNotRegistered(self.worker_id.clone()),
            ("payloadSignatureMismatch", _) => QueueError::PayloadSignatureMismatch,
            _ => QueueError::Http(format!("{status}: {}", error.message)),
        }
    }
}

#[async_trait]
impl QueueClient for HttpQueueClient {
    async fn register_worker(
        &self,
        worker_id: &WorkerId,
        capabilities: &BTreeSet<WorkerCapability>,
    ) -> Result<WorkerRegistration> {
        let payload = RegisterWorkerPayload {
            worker_id: worker_id.clone(),
            capabilities: capabilities.clone(),
            address: self.address.clone(),
        };
        let caller = Caller {
            worker_id,
            request_id: None,
        };
        self.post("/registerWorker", &payload, caller).await
    }

    async fn dequeue_bucket(
        &self,
        request_id: &RequestId,
        worker_id: &WorkerId,
        signature: &PayloadSignature,
    ) -> Result<DequeueResult> {
        let payload = DequeueBucketPayload {
            request_id: request_id.clone(),
            worker_id: worker_id.clone(),
            payload_signature: signature.clone(),
        };
        let caller = Caller {
            worker_id,
            request_id: Some(request_id),
        };
        let response: DequeueBucketResponse = self.post("/getBucket", &payload, caller).await?;
        Ok(response.into())
    }

    async fn send_bucket_result(
        &self,
        testing_result: TestingResult,
        request_id: &RequestId,
        worker_id: &WorkerId,
        signature: &PayloadSignature,
    ) -> Result<JobId> {
        let payload = BucketResultPayload {
            request_id: request_id.clone(),
            worker_id: worker_id.clone(),
            payload_signature: signature.clone(),
            testing_result,
        };
        let caller = Caller {
            worker_id,
            request_id: Some(request_id),
        };
        let accepted: AcceptedBucketResult = self.post("/bucketResult", &payload, caller).await?;
        Ok(accepted.job_id)
    }

    async fn report_alive(&self, worker_id: &WorkerId) -> Result<()> {
        let payload = WorkerIdPayload {
            worker_id: worker_id.clone(),
        };
        let caller = Caller {
            worker_id,
            request_id: None,
        };
        self.send::<_, serde_json::Value>("/reportAlive", &payload, caller)
            .await
            .map(|_| ())
    }
}
