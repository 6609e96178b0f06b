//! Request/Response Types
//!
//! JSON shapes of the Control API. Timestamps are RFC 3339 UTC.

use chrono::{DateTime, SecondsFormat};
use scanq_core::domain::{InvocationKind, Job, ModuleDescriptor, QueueHealth, WorkerInfo};
use scanq_core::error::AppError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub fn rfc3339(epoch_millis: i64) -> Option<String> {
    DateTime::from_timestamp_millis(epoch_millis)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// POST /api/tasks
#[derive(Debug, Default, Deserialize)]
pub struct SubmitTaskRequest {
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub payload: Value,
    /// Seconds; any JSON number, truncated toward zero
    #[serde(default)]
    pub timeout: Option<f64>,
}

impl SubmitTaskRequest {
    /// Whole seconds of the requested timeout
    pub fn timeout_secs(&self) -> Result<Option<u64>, AppError> {
        match self.timeout {
            None => Ok(None),
            Some(t) if t < 0.0 => Err(AppError::Validation(format!(
                "Timeout must not be negative: {}",
                t
            ))),
            // saturating cast; out-of-range values fail the queue's bound check
            Some(t) => Ok(Some(t.trunc() as u64)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskResponse {
    pub job_id: String,
    pub status: String,
}

/// Execution details of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMeta {
    pub module: String,
    pub queue: String,
    pub retries: u32,
    pub max_attempts: u32,
    pub timeout: u64,
    pub runtime_seconds: Option<f64>,
    pub error: Option<String>,
    pub worker: Option<String>,
}

/// GET /api/tasks/{id}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub status: String,
    pub enqueued_at: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub result: Option<Value>,
    pub meta: JobMeta,
}

impl From<Job> for JobSnapshot {
    fn from(job: Job) -> Self {
        Self {
            status: job.state.to_string(),
            enqueued_at: rfc3339(job.created_at),
            started_at: job.started_at.and_then(rfc3339),
            finished_at: job.finished_at.and_then(rfc3339),
            result: job.result,
            meta: JobMeta {
                module: job.module_key,
                queue: job.queue,
                retries: job.retry_count,
                max_attempts: job.max_attempts,
                timeout: job.timeout_secs,
                runtime_seconds: job.runtime_seconds,
                error: job.error,
                worker: job.worker_name,
            },
            id: job.id,
        }
    }
}

/// GET /api/health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    #[serde(rename = "queueBackend")]
    pub queue_backend: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<i64>,
    pub workers: usize,
}

impl From<QueueHealth> for HealthResponse {
    fn from(health: QueueHealth) -> Self {
        Self {
            queue_backend: health.backend.to_string(),
            pending: health.pending,
            running: health.running,
            workers: health.workers.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDto {
    pub name: String,
    pub state: String,
    pub queues: Vec<String>,
    pub birth_date: Option<String>,
    pub last_heartbeat: Option<String>,
    pub current_job: Option<String>,
    pub orphaned_calls: u64,
}

impl From<WorkerInfo> for WorkerDto {
    fn from(w: WorkerInfo) -> Self {
        Self {
            state: w.state.to_string(),
            birth_date: rfc3339(w.birth_date),
            last_heartbeat: rfc3339(w.last_heartbeat),
            name: w.name,
            queues: w.queues,
            current_job: w.current_job,
            orphaned_calls: w.orphaned_calls,
        }
    }
}

/// GET /api/health/workers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersResponse {
    pub workers: Vec<WorkerDto>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDto {
    pub key: String,
    pub description: String,
    #[serde(rename = "async")]
    pub is_async: bool,
    pub invocation: InvocationKind,
}

impl From<&ModuleDescriptor> for ModuleDto {
    fn from(d: &ModuleDescriptor) -> Self {
        Self {
            key: d.key.clone(),
            description: d.description.clone(),
            is_async: d.is_async,
            invocation: d.invocation_kind(),
        }
    }
}

/// GET /api/modules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesResponse {
    pub modules: Vec<ModuleDto>,
    pub count: usize,
}
