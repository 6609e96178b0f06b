// Enqueue Use Case

use crate::application::registry::ModuleRegistry;
use crate::application::worker::constants::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE, DEFAULT_TIMEOUT_SECS, MAX_PAYLOAD_DEPTH, MAX_TIMEOUT_SECS,
};
use crate::domain::{Job, JobId, JobPayload};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobStore, TimeProvider};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// Submission of one module run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub module: String,

    #[serde(default)]
    pub payload: Value,

    /// Per-attempt timeout; `None` or 0 selects the queue default
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl EnqueueRequest {
    pub fn new(module: impl Into<String>, payload: Value) -> Self {
        Self {
            module: module.into(),
            payload,
            timeout_secs: None,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }
}

/// Values stamped on every job this queue creates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefaults {
    pub queue: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Shape checks that need no registry or backend
pub fn validate_request(req: &EnqueueRequest) -> Result<()> {
    match &req.payload {
        Value::Object(_) | Value::Null => {}
        Value::Array(_) => {
            return Err(AppError::Validation(
                "Payload must be a JSON object, got array".to_string(),
            ))
        }
        _ => {
            return Err(AppError::Validation(
                "Payload must be a JSON object".to_string(),
            ))
        }
    }

    let depth = json_depth(&req.payload);
    if depth > MAX_PAYLOAD_DEPTH {
        return Err(AppError::Validation(format!(
            "Payload nested too deep: {} levels (max {})",
            depth, MAX_PAYLOAD_DEPTH
        )));
    }

    if let Some(timeout) = req.timeout_secs {
        if timeout > MAX_TIMEOUT_SECS {
            return Err(AppError::Validation(format!(
                "Timeout out of range: {}s (max {}s)",
                timeout, MAX_TIMEOUT_SECS
            )));
        }
    }
    Ok(())
}

fn json_depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Execute enqueue use case
///
/// The module key is checked before anything is persisted, so an unknown
/// module never produces a job.
pub async fn execute(
    store: &dyn JobStore,
    registry: &ModuleRegistry,
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    defaults: &JobDefaults,
    req: EnqueueRequest,
) -> Result<JobId> {
    registry.lookup(&req.module)?;
    validate_request(&req)?;

    let payload = JobPayload::from_value(req.payload)?;
    let timeout_secs = req
        .timeout_secs
        .filter(|t| *t > 0)
        .unwrap_or(defaults.timeout_secs);

    let job = Job::new(
        id_provider.generate_id(),
        time_provider.now_millis(),
        defaults.queue.clone(),
        req.module,
        payload,
        timeout_secs,
        defaults.max_attempts,
    );
    store.insert(&job).await?;

    info!(
        job_id = %job.id,
        module = %job.module_key,
        queue = %job.queue,
        timeout_secs,
        "Job enqueued"
    );
    Ok(job.id)
}

#[cfg(test)]
#[path = "enqueue_test.rs"]
mod enqueue_test;
