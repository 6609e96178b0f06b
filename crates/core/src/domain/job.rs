// Job Domain Model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::error::{DomainError, Result};

/// Job ID (UUID v4)
pub type JobId = String;

/// Queue identifier
pub type QueueName = String;

/// Job lifecycle state
///
/// ```text
/// PENDING -> RUNNING -> SUCCESS | FAILED
/// PENDING -> CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Success | JobState::Failed | JobState::Cancelled)
    }

    /// Forward-only transitions
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Running)
                | (JobState::Pending, JobState::Cancelled)
                | (JobState::Running, JobState::Success)
                | (JobState::Running, JobState::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Success => "SUCCESS",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobState::Pending),
            "RUNNING" => Some(JobState::Running),
            "SUCCESS" => Some(JobState::Success),
            "FAILED" => Some(JobState::Failed),
            "CANCELLED" => Some(JobState::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job payload: string keys to arbitrary JSON values (target, prompt, notes, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobPayload(Map<String, Value>);

impl JobPayload {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Accepts a JSON object; `null` is treated as an empty payload
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(DomainError::InvalidPayload(json_kind(&other).to_string())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Job Entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: QueueName,
    pub module_key: String,
    pub payload: JobPayload,
    pub state: JobState,

    pub created_at: i64, // epoch ms
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,

    // Execution budget
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_count: u32,

    // Outcome
    pub result: Option<Value>,
    pub error: Option<String>,
    pub runtime_seconds: Option<f64>,

    // Ownership while RUNNING
    pub worker_name: Option<String>,
    pub lease_expires_at: Option<i64>, // epoch ms
}

impl Job {
    /// Create a new PENDING job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `queue` - Queue name
    /// * `module_key` - Registry key of the module to run
    /// * `payload` - Module arguments
    /// * `timeout_secs` - Per-attempt deadline
    /// * `max_attempts` - Invocation attempts before the job fails
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        queue: impl Into<String>,
        module_key: impl Into<String>,
        payload: JobPayload,
        timeout_secs: u64,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: id.into(),
            queue: queue.into(),
            module_key: module_key.into(),
            payload,
            state: JobState::Pending,
            created_at,
            started_at: None,
            finished_at: None,
            timeout_secs,
            max_attempts,
            retry_count: 0,
            result: None,
            error: None,
            runtime_seconds: None,
            worker_name: None,
            lease_expires_at: None,
        }
    }

    /// Create a job with a deterministic ID and timestamp.
    ///
    /// IDs are `test-1`, `test-2`, ...; timestamps start at 1000 and step by 1000.
    /// Production code injects ID and time via providers.
    #[cfg(any(test, feature = "test-util"))]
    pub fn new_test(module_key: impl Into<String>, payload: JobPayload) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self::new(
            format!("test-{}", counter),
            (counter * 1000) as i64,
            "test_queue",
            module_key,
            payload,
            5,
            3,
        )
    }

    fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// PENDING -> RUNNING, owned by `worker` until `lease_expires_at`
    pub fn start(
        &mut self,
        now_millis: i64,
        worker: impl Into<String>,
        lease_expires_at: i64,
    ) -> Result<()> {
        self.transition(JobState::Running)?;
        self.started_at = Some(now_millis);
        self.worker_name = Some(worker.into());
        self.lease_expires_at = Some(lease_expires_at);
        Ok(())
    }

    /// RUNNING -> SUCCESS
    pub fn succeed(&mut self, now_millis: i64, result: Value, retry_count: u32) -> Result<()> {
        self.transition(JobState::Success)?;
        self.result = Some(result);
        self.error = None;
        self.finish(now_millis, retry_count);
        Ok(())
    }

    /// RUNNING -> FAILED
    pub fn fail(
        &mut self,
        now_millis: i64,
        error: impl Into<String>,
        retry_count: u32,
    ) -> Result<()> {
        self.transition(JobState::Failed)?;
        self.error = Some(error.into());
        self.finish(now_millis, retry_count);
        Ok(())
    }

    /// RUNNING -> FAILED for a job whose owner stopped reporting.
    ///
    /// The lease spans every attempt timing out, so the whole attempt budget
    /// is recorded as spent.
    pub fn expire_lease(&mut self, now_millis: i64, reason: impl Into<String>) -> Result<()> {
        self.fail(now_millis, reason, self.max_attempts.saturating_sub(1))
    }

    /// PENDING -> CANCELLED
    pub fn cancel(&mut self, now_millis: i64) -> Result<()> {
        self.transition(JobState::Cancelled)?;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    fn finish(&mut self, now_millis: i64, retry_count: u32) {
        self.retry_count = retry_count.min(self.max_attempts.saturating_sub(1));
        self.finished_at = Some(now_millis);
        self.lease_expires_at = None;
        self.runtime_seconds = self.started_at.map(|started| runtime_seconds(started, now_millis));
    }
}

/// Elapsed seconds rounded to milliseconds
pub fn runtime_seconds(started_at: i64, finished_at: i64) -> f64 {
    (finished_at - started_at).max(0) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> JobPayload {
        JobPayload::from_value(json!({"target": "10.0.0.1"})).unwrap()
    }

    #[test]
    fn test_new_job_is_pending_without_timestamps() {
        let job = Job::new_test("echo", payload());
        assert_eq!(job.state, JobState::Pending);
        assert!(job.started_at.is_none());
        assert!(job.finished_at.is_none());
        assert_eq!(job.retry_count, 0);
    }

    #[test]
    fn test_full_lifecycle_sets_finished_only_when_terminal() {
        let mut job = Job::new_test("echo", payload());
        job.start(2_000, "w-1", 10_000).unwrap();
        assert_eq!(job.state, JobState::Running);
        assert!(job.finished_at.is_none());

        job.succeed(3_500, json!({"ok": true}), 0).unwrap();
        assert_eq!(job.state, JobState::Success);
        assert_eq!(job.finished_at, Some(3_500));
        assert_eq!(job.runtime_seconds, Some(1.5));
        assert!(job.lease_expires_at.is_none());
    }

    #[test]
    fn test_no_backward_transitions() {
        let mut job = Job::new_test("echo", payload());
        job.start(1, "w-1", 2).unwrap();
        job.fail(3, "boom", 2).unwrap();

        assert!(job.start(4, "w-2", 5).is_err());
        assert!(job.succeed(4, json!(null), 0).is_err());
        assert!(job.cancel(4).is_err());
        assert_eq!(job.state, JobState::Failed);
    }

    #[test]
    fn test_cancel_only_from_pending() {
        let mut job = Job::new_test("echo", payload());
        job.cancel(5).unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert!(job.state.is_terminal());

        let mut running = Job::new_test("echo", payload());
        running.start(1, "w-1", 2).unwrap();
        assert!(running.cancel(2).is_err());
    }

    #[test]
    fn test_expired_lease_spends_attempt_budget() {
        let mut job = Job::new_test("echo", payload());
        job.start(1_000, "w-1", 20_000).unwrap();
        job.expire_lease(30_000, "worker lease expired").unwrap();

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.retry_count, job.max_attempts - 1);
        assert_eq!(job.worker_name.as_deref(), Some("w-1"));
        assert!(job.lease_expires_at.is_none());

        let mut pending = Job::new_test("echo", payload());
        assert!(pending.expire_lease(1, "worker lease expired").is_err());
    }

    #[test]
    fn test_retry_count_capped_by_max_attempts() {
        let mut job = Job::new_test("echo", payload());
        job.start(1, "w-1", 2).unwrap();
        job.fail(3, "boom", 99).unwrap();
        assert_eq!(job.retry_count, job.max_attempts - 1);
    }

    #[test]
    fn test_payload_must_be_object() {
        assert!(JobPayload::from_value(json!([1, 2])).is_err());
        assert!(JobPayload::from_value(json!("x")).is_err());
        assert!(JobPayload::from_value(json!(null)).unwrap().is_empty());
        assert_eq!(payload().get_str("target"), Some("10.0.0.1"));
    }

    #[test]
    fn test_state_string_round_trip() {
        for state in [
            JobState::Pending,
            JobState::Running,
            JobState::Success,
            JobState::Failed,
            JobState::Cancelled,
        ] {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
        assert_eq!(JobState::parse("DONE"), None);
    }
}
