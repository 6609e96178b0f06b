// Job Queue Service - submit, inspect, cancel, health

pub mod enqueue;

pub use enqueue::{validate_request, EnqueueRequest, JobDefaults};

use crate::application::registry::ModuleRegistry;
use crate::application::worker::constants::WORKER_ALIVE_WINDOW_MS;
use crate::domain::{BackendStatus, Job, JobId, JobState, QueueHealth, WorkerInfo};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobStore, TimeProvider, WorkerRegistry};
use std::sync::Arc;
use tracing::{info, warn};

/// Control-plane view of the durable job queue
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    workers: Arc<dyn WorkerRegistry>,
    registry: Arc<ModuleRegistry>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    defaults: JobDefaults,
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn JobStore>,
        workers: Arc<dyn WorkerRegistry>,
        registry: Arc<ModuleRegistry>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        defaults: JobDefaults,
    ) -> Self {
        Self {
            store,
            workers,
            registry,
            id_provider,
            time_provider,
            defaults,
        }
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn defaults(&self) -> &JobDefaults {
        &self.defaults
    }

    /// Persist a PENDING job; `UnknownModule` and `Validation` fail before any write
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<JobId> {
        enqueue::execute(
            self.store.as_ref(),
            &self.registry,
            self.id_provider.as_ref(),
            self.time_provider.as_ref(),
            &self.defaults,
            req,
        )
        .await
    }

    /// Current snapshot of a job
    pub async fn get_status(&self, id: &str) -> Result<Job> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::JobNotFound(id.to_string()))
    }

    /// Cancel a job that has not started yet
    pub async fn cancel(&self, id: &str) -> Result<Job> {
        let job = self
            .store
            .cancel_pending(id, self.time_provider.now_millis())
            .await?;
        info!(job_id = %job.id, "Job cancelled");
        Ok(job)
    }

    /// Workers that heartbeated recently
    pub async fn workers(&self) -> Result<Vec<WorkerInfo>> {
        let since = self.time_provider.now_millis() - WORKER_ALIVE_WINDOW_MS;
        self.workers.list_alive(since).await
    }

    /// Backend reachability plus queue depth and live workers. Never fails.
    pub async fn health(&self) -> QueueHealth {
        if let Err(e) = self.store.ping().await {
            let detail = match e {
                AppError::Backend(detail) => detail,
                other => other.to_string(),
            };
            warn!(error = %detail, "Queue backend health check failed");
            return QueueHealth {
                backend: BackendStatus::Error(detail),
                workers: Vec::new(),
                pending: None,
                running: None,
            };
        }

        let queue = Some(self.defaults.queue.as_str());
        let pending = self.store.count_by_state(queue, JobState::Pending).await.ok();
        let running = self.store.count_by_state(queue, JobState::Running).await.ok();
        let workers = self.workers().await.unwrap_or_else(|e| {
            warn!(error = %e, "Could not list workers");
            Vec::new()
        });

        QueueHealth {
            backend: BackendStatus::Ok,
            workers,
            pending,
            running,
        }
    }
}
