//! HTTP/JSON transport for the queue server.
//!
//! Worker endpoints (`/registerWorker`, `/getBucket`, `/bucketResult`,
//! `/reportAlive`) and client endpoints (jobs, worker administration) are
//! plain JSON POSTs named after the operation they perform.

pub mod payloads;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{QueueError, Result};
use crate::scheduler::{JobResults, JobState};
use crate::server::{AcceptedBucketResult, QueueServer, WorkerRegistration, WorkerStatus};
use payloads::*;

pub type ApiState = Arc<QueueServer>;

impl IntoResponse for QueueError {
    fn into_response(self) -> Response {
        let status = match &self {
            QueueError::UnknownBucket { .. } => StatusCode::CONFLICT,
            QueueError::JobNotFound(_) => StatusCode::NOT_FOUND,
            QueueError::JobAlreadyDeleted(_) => StatusCode::GONE,
            QueueError::WorkerNotRegistered(_) | QueueError::PayloadSignatureMismatch => {
                StatusCode::FORBIDDEN
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let body = ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/registerWorker", post(register_worker_handler))
        .route("/getBucket", post(get_bucket_handler))
        .route("/bucketResult", post(bucket_result_handler))
        .route("/reportAlive", post(report_alive_handler))
        .route("/enableWorker", post(enable_worker_handler))
        .route("/disableWorker", post(disable_worker_handler))
        .route("/workerStatus", get(worker_status_handler))
        .route("/toggleWorkersSharing", post(toggle_workers_sharing_handler))
        .route(
            "/workersToUtilize",
            get(get_workers_to_utilize_handler).post(set_workers_to_utilize_handler),
        )
        .route("/scheduleTests", post(schedule_tests_handler))
        .route("/jobState", post(job_state_handler))
        .route("/jobStates", get(job_states_handler))
        .route("/jobResults", post(job_results_handler))
        .route("/jobDelete", post(job_delete_handler))
        .route("/queueVersion", get(queue_version_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serves the API until `shutdown` is cancelled.
pub async fn run_api(addr: SocketAddr, state: ApiState, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Queue server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Queue server stopped");
    Ok(())
}

async fn register_worker_handler(
    State(server): State<ApiState>,
    Json(payload): Json<RegisterWorkerPayload>,
) -> Json<WorkerRegistration> {
    Json(
        server
            .register_worker(payload.worker_id, payload.capabilities, payload.address)
            .await,
    )
}

async fn get_bucket_handler(
    State(server): State<ApiState>,
    Json(payload): Json<DequeueBucketPayload>,
) -> Result<Json<DequeueBucketResponse>> {
    let result = server
        .dequeue_bucket(
            payload.request_id,
            payload.worker_id,
            &payload.payload_signature,
        )
        .await?;
    Ok(Json(result.into()))
}

async fn bucket_result_handler(
    State(server): State<ApiState>,
    Json(payload): Json<BucketResultPayload>,
) -> Result<Json<AcceptedBucketResult>> {
    let accepted = server
        .accept_result(
            payload.testing_result,
            &payload.request_id,
            &payload.worker_id,
            &payload.payload_signature,
        )
        .await?;
    Ok(Json(accepted))
}

async fn report_alive_handler(
    State(server): State<ApiState>,
    Json(payload): Json<WorkerIdPayload>,
) -> Result<StatusCode> {
    server.report_alive(&payload.worker_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn enable_worker_handler(
    State(server): State<ApiState>,
    Json(payload): Json<WorkerIdPayload>,
) -> Result<StatusCode> {
    server.enable_worker(&payload.worker_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn disable_worker_handler(
    State(server): State<ApiState>,
    Json(payload): Json<WorkerIdPayload>,
) -> Result<StatusCode> {
    server.disable_worker(&payload.worker_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn worker_status_handler(State(server): State<ApiState>) -> Json<Vec<WorkerStatus>> {
    Json(server.worker_status().await)
}

async fn toggle_workers_sharing_handler(
    State(server): State<ApiState>,
    Json(payload): Json<ToggleWorkersSharingPayload>,
) -> StatusCode {
    server.toggle_workers_sharing(payload.enabled).await;
    StatusCode::NO_CONTENT
}

async fn get_workers_to_utilize_handler(
    State(server): State<ApiState>,
) -> Json<WorkersToUtilizePayload> {
    Json(WorkersToUtilizePayload {
        workers: server.workers_to_utilize().await,
    })
}

async fn set_workers_to_utilize_handler(
    State(server): State<ApiState>,
    Json(payload): Json<WorkersToUtilizePayload>,
) -> Json<WorkersToUtilizePayload> {
    server.set_workers_to_utilize(payload.workers).await;
    Json(WorkersToUtilizePayload {
        workers: server.workers_to_utilize().await,
    })
}

async fn schedule_tests_handler(
    State(server): State<ApiState>,
    Json(payload): Json<ScheduleTestsPayload>,
) -> Result<Json<ScheduleTestsResponse>> {
    let job_id = payload.prioritized_job.job_id.clone();
    let bucket_count = server
        .schedule_tests(
            payload.prioritized_job,
            payload.schedule_strategy,
            payload.test_entry_configurations,
        )
        .await?;
    Ok(Json(ScheduleTestsResponse {
        job_id,
        bucket_count,
    }))
}

async fn job_state_handler(
    State(server): State<ApiState>,
    Json(payload): Json<JobIdPayload>,
) -> Result<Json<JobState>> {
    Ok(Json(server.job_state(&payload.job_id).await?))
}

async fn job_states_handler(State(server): State<ApiState>) -> Json<Vec<JobState>> {
    Json(server.job_states().await)
}

async fn job_results_handler(
    State(server): State<ApiState>,
    Json(payload): Json<JobIdPayload>,
) -> Result<Json<JobResults>> {
    Ok(Json(server.job_results(&payload.job_id).await?))
}

async fn job_delete_handler(
    State(server): State<ApiState>,
    Json(payload): Json<JobIdPayload>,
) -> Result<StatusCode> {
    server.delete_job(&payload.job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn queue_version_handler(State(server): State<ApiState>) -> Json<QueueVersionResponse> {
    Json(QueueVersionResponse {
        version: server.queue_version().to_string(),
    })
}
