//! Route Handlers

use crate::error::ApiError;
use crate::rate_limiter::RateLimiter;
use crate::types::{
    HealthResponse, JobSnapshot, ModuleDto, ModulesResponse, SubmitTaskRequest,
    SubmitTaskResponse, WorkerDto, WorkersResponse,
};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use scanq_core::application::{EnqueueRequest, JobQueue};
use scanq_core::domain::JobState;
use scanq_core::error::AppError;
use std::sync::Arc;
use tracing::info;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(queue: Arc<JobQueue>, rate_limiter: RateLimiter) -> Self {
        Self {
            queue,
            rate_limiter: Arc::new(rate_limiter),
        }
    }
}

/// POST /api/tasks
///
/// The body is parsed as JSON whatever its content type; an empty body is `{}`.
pub async fn submit_task(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<SubmitTaskResponse>), ApiError> {
    if !state.rate_limiter.check() {
        return Err(ApiError::RateLimited);
    }

    let req: SubmitTaskRequest = if body.iter().all(u8::is_ascii_whitespace) {
        SubmitTaskRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))?
    };

    let Some(module) = req.module.clone() else {
        return Err(AppError::UnknownModule {
            key: String::new(),
            available: state.queue.modules().keys(),
        }
        .into());
    };

    let timeout_secs = req.timeout_secs()?;
    let mut enqueue = EnqueueRequest::new(module, req.payload);
    enqueue.timeout_secs = timeout_secs;
    let job_id = state.queue.enqueue(enqueue).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitTaskResponse {
            job_id,
            status: JobState::Pending.to_string(),
        }),
    ))
}

/// GET /api/tasks/{job_id}
pub async fn task_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let job = state.queue.get_status(&job_id).await?;
    Ok(Json(job.into()))
}

/// DELETE /api/tasks/{job_id}
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let job = state.queue.cancel(&job_id).await?;
    info!(job_id = %job.id, "Cancelled via API");
    Ok(Json(job.into()))
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(state.queue.health().await.into())
}

/// GET /api/health/workers
pub async fn worker_health(
    State(state): State<AppState>,
) -> Result<Json<WorkersResponse>, ApiError> {
    let workers: Vec<WorkerDto> = state
        .queue
        .workers()
        .await?
        .into_iter()
        .map(WorkerDto::from)
        .collect();
    Ok(Json(WorkersResponse {
        count: workers.len(),
        workers,
    }))
}

/// GET /api/modules
pub async fn list_modules(State(state): State<AppState>) -> Json<ModulesResponse> {
    let modules: Vec<ModuleDto> = state
        .queue
        .modules()
        .descriptors()
        .map(ModuleDto::from)
        .collect();
    Json(ModulesResponse {
        count: modules.len(),
        modules,
    })
}
