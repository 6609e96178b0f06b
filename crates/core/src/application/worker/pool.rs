// Worker Pool - N workers, heartbeats, periodic lease checks
use super::constants::{HEARTBEAT_INTERVAL, REAP_EVERY_HEARTBEATS};
use super::{ShutdownToken, Worker};
use crate::application::recovery::LeaseReaper;
use crate::application::retry::RetryExecutor;
use crate::error::Result;
use crate::port::{JobStore, TimeProvider, WorkerRegistry};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Pool sizing and naming
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub size: usize,
    pub queue: String,
    /// Worker names are `<prefix>.<pid>.<instance>.<n>`; `instance` is random per pool
    pub name_prefix: String,
}

/// Concurrently running workers sharing one store and one invoker
pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
    reaper: LeaseReaper,
}

impl WorkerPool {
    pub fn new(
        config: &PoolConfig,
        store: Arc<dyn JobStore>,
        registry: Arc<dyn WorkerRegistry>,
        executor: RetryExecutor,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let pid = std::process::id();
        let instance = pool_instance();
        let workers = (1..=config.size.max(1))
            .map(|n| {
                Arc::new(Worker::new(
                    format!("{}.{}.{}.{}", config.name_prefix, pid, instance, n),
                    config.queue.clone(),
                    Arc::clone(&store),
                    Arc::clone(&registry),
                    executor.clone(),
                    Arc::clone(&time_provider),
                ))
            })
            .collect();
        Self {
            workers,
            reaper: LeaseReaper::new(store, time_provider),
        }
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    async fn reap(&self) {
        if let Err(e) = self.reaper.reap_expired().await {
            warn!(error = %e, "Lease check failed");
        }
    }

    /// Run every worker until shutdown, then wait for in-flight jobs and deregister
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        self.reap().await;

        let mut tasks = JoinSet::new();
        for worker in &self.workers {
            if let Err(e) = worker.heartbeat().await {
                warn!(worker = %worker.name(), error = %e, "Initial registration failed");
            }
            let worker = Arc::clone(worker);
            let token = shutdown.clone();
            tasks.spawn(async move {
                let result = worker.run(token).await;
                (worker.name().to_string(), result)
            });
        }
        info!(workers = self.workers.len(), "Worker pool started");

        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        ticker.tick().await;
        let mut beats: u32 = 0;
        while !shutdown.is_shutdown() {
            tokio::select! {
                _ = ticker.tick() => {
                    for worker in &self.workers {
                        if let Err(e) = worker.heartbeat().await {
                            warn!(worker = %worker.name(), error = %e, "Heartbeat failed");
                        }
                    }
                    beats = beats.wrapping_add(1);
                    if beats % REAP_EVERY_HEARTBEATS == 0 {
                        self.reap().await;
                    }
                }
                _ = shutdown.wait() => break,
            }
        }

        info!("Worker pool draining in-flight jobs");
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(e))) => error!(worker = %name, error = %e, "Worker exited with error"),
                Err(e) => error!(error = %e, "Worker task aborted"),
            }
        }

        for worker in &self.workers {
            if let Err(e) = worker.deregister().await {
                warn!(worker = %worker.name(), error = %e, "Deregistration failed");
            }
        }
        info!("Worker pool stopped");
        Ok(())
    }
}

/// Distinguishes pools sharing a process or a PID (one daemon per container)
fn pool_instance() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
