// Queue & worker health snapshots (derived, never persisted as such)

use serde::{Deserialize, Serialize};

/// Worker activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Busy,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Busy => "busy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(WorkerState::Idle),
            "busy" => Some(WorkerState::Busy),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live worker as seen through the worker registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub name: String,
    pub state: WorkerState,
    pub queues: Vec<String>,
    pub birth_date: i64,     // epoch ms
    pub last_heartbeat: i64, // epoch ms
    pub current_job: Option<String>,
    /// Blocking module calls abandoned after their deadline (threads still running)
    pub orphaned_calls: u64,
}

impl WorkerInfo {
    pub fn new(name: impl Into<String>, queues: Vec<String>, now_millis: i64) -> Self {
        Self {
            name: name.into(),
            state: WorkerState::Idle,
            queues,
            birth_date: now_millis,
            last_heartbeat: now_millis,
            current_job: None,
            orphaned_calls: 0,
        }
    }
}

/// Backend connectivity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    Ok,
    Error(String),
}

impl BackendStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, BackendStatus::Ok)
    }
}

impl std::fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendStatus::Ok => f.write_str("ok"),
            BackendStatus::Error(detail) => write!(f, "error: {}", detail),
        }
    }
}

/// Point-in-time queue health
#[derive(Debug, Clone)]
pub struct QueueHealth {
    pub backend: BackendStatus,
    pub workers: Vec<WorkerInfo>,
    pub pending: Option<i64>,
    pub running: Option<i64>,
}
