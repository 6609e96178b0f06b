// Worker - Job execution loop

pub mod constants;
mod panic_guard;
mod pool;
mod shutdown;

use constants::*;
pub use panic_guard::{execute_guarded, panic_message, PanicGuardResult};
pub use pool::{PoolConfig, WorkerPool};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::registry::ModuleRegistry;
use crate::application::retry::RetryExecutor;
use crate::domain::{WorkerInfo, WorkerState};
use crate::error::{AppError, Result};
use crate::port::{Claim, JobStore, TimeProvider, WorkerRegistry};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Worker pulls jobs from one queue and runs them through the retry executor
pub struct Worker {
    name: String,
    queue: String,
    store: Arc<dyn JobStore>,
    workers: Arc<dyn WorkerRegistry>,
    modules: Arc<ModuleRegistry>,
    executor: RetryExecutor,
    time_provider: Arc<dyn TimeProvider>,
    status: Mutex<WorkerInfo>,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        queue: impl Into<String>,
        store: Arc<dyn JobStore>,
        workers: Arc<dyn WorkerRegistry>,
        executor: RetryExecutor,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let name = name.into();
        let queue = queue.into();
        let status = WorkerInfo::new(
            name.clone(),
            vec![queue.clone()],
            time_provider.now_millis(),
        );
        Self {
            modules: Arc::clone(executor.invoker().registry()),
            name,
            queue,
            store,
            workers,
            executor,
            time_provider,
            status: Mutex::new(status),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current registry record for this worker
    pub fn info(&self) -> WorkerInfo {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn update_status(&self, f: impl FnOnce(&mut WorkerInfo)) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut status);
    }

    /// Refresh this worker's record in the registry
    pub async fn heartbeat(&self) -> Result<()> {
        let now = self.time_provider.now_millis();
        self.update_status(|s| s.last_heartbeat = now);
        self.workers.heartbeat(&self.info()).await
    }

    pub async fn deregister(&self) -> Result<()> {
        self.workers.deregister(&self.name).await
    }

    async fn publish(&self) {
        if let Err(e) = self.heartbeat().await {
            warn!(worker = %self.name, error = %e, "Heartbeat failed");
        }
    }

    /// Run worker loop with graceful shutdown support.
    ///
    /// A job already claimed is always finished before the loop exits.
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(worker = %self.name, "Worker started for queue: {}", self.queue);
        loop {
            if shutdown.is_shutdown() {
                info!(worker = %self.name, "Worker shutting down");
                break;
            }
            match self.process_next_job().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = sleep(IDLE_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => {
                            info!(worker = %self.name, "Worker interrupted during idle");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(worker = %self.name, "Worker error: {}", e);
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => {
                            info!(worker = %self.name, "Worker interrupted during error recovery");
                            break;
                        }
                    }
                }
            }
        }
        info!(worker = %self.name, "Worker stopped");
        Ok(())
    }

    /// Claim and run the next job (returns true if a job was processed)
    pub async fn process_next_job(&self) -> Result<bool> {
        let claim = Claim {
            worker: self.name.clone(),
            now_millis: self.time_provider.now_millis(),
            max_wait_ms: self.executor.policy().backoff.max_wait.as_millis() as i64,
            grace_ms: LEASE_GRACE_MS,
        };
        let mut job = match self.store.dequeue(&self.queue, &claim).await? {
            Some(j) => j,
            None => return Ok(false),
        };

        self.update_status(|s| {
            s.state = WorkerState::Busy;
            s.current_job = Some(job.id.clone());
        });
        self.publish().await;
        info!(job_id = %job.id, module = %job.module_key, "Processing job");

        let (result, retry_count) = match self.modules.lookup(&job.module_key) {
            Ok(descriptor) => {
                let outcome = self
                    .executor
                    .with_max_attempts(job.max_attempts)
                    .execute_with_retry(
                        descriptor,
                        &job.payload,
                        Duration::from_secs(job.timeout_secs),
                    )
                    .await;
                if outcome.orphaned_calls > 0 {
                    let orphaned = u64::from(outcome.orphaned_calls);
                    self.update_status(|s| s.orphaned_calls += orphaned);
                }
                let retry_count = outcome.retry_count();
                (outcome.result.map_err(|e| e.to_string()), retry_count)
            }
            // Registry differs from the one the job was submitted against
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Job references an unregistered module");
                (Err(e.to_string()), 0)
            }
        };

        let now = self.time_provider.now_millis();
        match result {
            Ok(value) => job.succeed(now, value, retry_count)?,
            Err(message) => job.fail(now, message, retry_count)?,
        }
        let completed = self.store.complete(&job).await;

        self.update_status(|s| {
            s.state = WorkerState::Idle;
            s.current_job = None;
        });
        self.publish().await;

        match completed {
            Ok(()) => info!(
                job_id = %job.id,
                state = %job.state,
                retries = job.retry_count,
                runtime_seconds = job.runtime_seconds.unwrap_or_default(),
                "Job finished"
            ),
            Err(AppError::InvalidState(msg)) => warn!(
                job_id = %job.id,
                reason = %msg,
                "Job outcome discarded, job changed while running"
            ),
            Err(e) => return Err(e),
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::invoker::ModuleInvoker;
    use crate::application::retry::{BackoffPolicy, RetryPolicy};
    use crate::domain::{Job, JobPayload, JobState, ModuleDescriptor};
    use crate::port::job_store::memory::InMemoryJobStore;
    use crate::port::module_unit::mocks::{Behavior, ScriptedLoader, ScriptedUnit};
    use crate::port::time_provider::ManualTimeProvider;
    use crate::port::worker_registry::memory::InMemoryWorkerRegistry;
    use serde_json::json;

    struct Fixture {
        store: Arc<InMemoryJobStore>,
        workers: Arc<InMemoryWorkerRegistry>,
        loader: Arc<ScriptedLoader>,
        worker: Worker,
    }

    fn fixture() -> Fixture {
        let unit = ScriptedUnit::new()
            .with_function("echo", Behavior::Echo, true)
            .with_function("always_fails", Behavior::Fail("Intentional failure".into()), true)
            .with_function("flaky", Behavior::FailTimes(2), true)
            .with_function("stuck", Behavior::Sleep(Duration::from_millis(1500)), false);
        let loader = Arc::new(ScriptedLoader::new().with_unit("diagnostics", unit));
        let registry = Arc::new(
            ModuleRegistry::new(vec![
                ModuleDescriptor::function("echo", "diagnostics", "echo", true, ""),
                ModuleDescriptor::function("always_fails", "diagnostics", "always_fails", true, ""),
                ModuleDescriptor::function("flaky", "diagnostics", "flaky", true, ""),
                ModuleDescriptor::function("stuck", "diagnostics", "stuck", false, ""),
            ])
            .unwrap(),
        );
        let invoker = Arc::new(ModuleInvoker::new(registry, loader.clone()));
        let executor = RetryExecutor::new(
            invoker,
            RetryPolicy {
                max_attempts: 3,
                backoff: BackoffPolicy::new(1.0, Duration::from_secs(1), Duration::from_secs(2)),
            },
        );

        let store = Arc::new(InMemoryJobStore::new());
        let workers = Arc::new(InMemoryWorkerRegistry::new());
        let worker = Worker::new(
            "worker-1",
            "test_queue",
            store.clone(),
            workers.clone(),
            executor,
            Arc::new(ManualTimeProvider::new(10_000)),
        );
        Fixture {
            store,
            workers,
            loader,
            worker,
        }
    }

    impl Fixture {
        async fn submit(&self, module: &str, payload: serde_json::Value) -> Job {
            let job = Job::new_test(module, JobPayload::from_value(payload).unwrap());
            self.store.insert(&job).await.unwrap();
            job
        }

        async fn stored(&self, job: &Job) -> Job {
            self.store.find_by_id(&job.id).await.unwrap().unwrap()
        }

        fn calls(&self, name: &str) -> usize {
            self.loader.unit("diagnostics").unwrap().calls(name)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_processes_nothing() {
        let f = fixture();
        assert!(!f.worker.process_next_job().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_job_succeeds_with_result() {
        let f = fixture();
        let job = f.submit("echo", json!({"target": "10.0.0.1"})).await;

        assert!(f.worker.process_next_job().await.unwrap());

        let stored = f.stored(&job).await;
        assert_eq!(stored.state, JobState::Success);
        assert_eq!(stored.result, Some(json!({"echo": {"target": "10.0.0.1"}})));
        assert_eq!(stored.retry_count, 0);
        assert!(stored.started_at.is_some() && stored.finished_at.is_some());
        assert!(stored.runtime_seconds.is_some());
        assert_eq!(stored.worker_name.as_deref(), Some("worker-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_job_fails_after_three_attempts() {
        let f = fixture();
        let job = f.submit("always_fails", json!({})).await;

        f.worker.process_next_job().await.unwrap();

        let stored = f.stored(&job).await;
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(stored.retry_count, 2);
        assert!(stored
            .error
            .as_deref()
            .is_some_and(|e| e.contains("Intentional failure")));
        assert!(stored.result.is_none());
        assert_eq!(f.calls("always_fails"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_recover() {
        let f = fixture();
        let job = f.submit("flaky", json!({})).await;

        f.worker.process_next_job().await.unwrap();

        let stored = f.stored(&job).await;
        assert_eq!(stored.state, JobState::Success);
        assert_eq!(stored.retry_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_module_fails_without_retry() {
        let f = fixture();
        let job = f.submit("retired_module", json!({})).await;

        f.worker.process_next_job().await.unwrap();

        let stored = f.stored(&job).await;
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(stored.retry_count, 0);
        assert!(stored.error.as_deref().is_some_and(|e| e.contains("Unknown module")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_returns_to_idle_in_registry() {
        let f = fixture();
        f.submit("echo", json!({})).await;

        f.worker.process_next_job().await.unwrap();

        let alive = f.workers.list_alive(0).await.unwrap();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].state, WorkerState::Idle);
        assert!(alive[0].current_job.is_none());
        assert_eq!(alive[0].queues, vec!["test_queue".to_string()]);
    }

    #[tokio::test]
    async fn test_blocking_timeout_counts_orphaned_call() {
        let f = fixture();
        let mut job = Job::new_test("stuck", JobPayload::default());
        job.timeout_secs = 1;
        job.max_attempts = 1;
        f.store.insert(&job).await.unwrap();

        f.worker.process_next_job().await.unwrap();

        let stored = f.stored(&job).await;
        assert_eq!(stored.state, JobState::Failed);
        assert!(stored.error.as_deref().is_some_and(|e| e.contains("timed out")));
        assert_eq!(f.worker.info().orphaned_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_drains_queue_and_stops_on_shutdown() {
        let f = Arc::new(fixture());
        let jobs = vec![
            f.submit("echo", json!({"n": 1})).await,
            f.submit("echo", json!({"n": 2})).await,
        ];

        let (tx, token) = shutdown_channel();
        let runner = {
            let f = Arc::clone(&f);
            tokio::spawn(async move { f.worker.run(token).await })
        };

        for _ in 0..100 {
            if f.store.count_by_state(None, JobState::Success).await.unwrap() == 2 {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }
        tx.shutdown();
        runner.await.unwrap().unwrap();

        for job in &jobs {
            assert_eq!(f.stored(job).await.state, JobState::Success);
        }
        assert_eq!(f.calls("echo"), 2);
    }
}
