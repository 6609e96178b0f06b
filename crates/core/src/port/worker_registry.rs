// Worker Registry Port - liveness records for health reporting

use crate::domain::WorkerInfo;
use crate::error::Result;
use async_trait::async_trait;

/// Registry of workers servicing the queue (shared across processes)
#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// Insert or replace a worker record
    async fn register(&self, info: &WorkerInfo) -> Result<()>;

    /// Refresh state and heartbeat of a worker (re-registers if the record vanished)
    async fn heartbeat(&self, info: &WorkerInfo) -> Result<()> {
        self.register(info).await
    }

    /// Remove a worker on graceful shutdown
    async fn deregister(&self, name: &str) -> Result<()>;

    /// Workers whose last heartbeat is at or after `since_millis`
    async fn list_alive(&self, since_millis: i64) -> Result<Vec<WorkerInfo>>;
}

pub mod memory {
    use super::*;
    use crate::error::AppError;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryWorkerRegistry {
        workers: Mutex<BTreeMap<String, WorkerInfo>>,
    }

    impl InMemoryWorkerRegistry {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, WorkerInfo>>> {
            self.workers
                .lock()
                .map_err(|_| AppError::Internal("worker registry mutex poisoned".to_string()))
        }
    }

    #[async_trait]
    impl WorkerRegistry for InMemoryWorkerRegistry {
        async fn register(&self, info: &WorkerInfo) -> Result<()> {
            self.lock()?.insert(info.name.clone(), info.clone());
            Ok(())
        }

        async fn deregister(&self, name: &str) -> Result<()> {
            self.lock()?.remove(name);
            Ok(())
        }

        async fn list_alive(&self, since_millis: i64) -> Result<Vec<WorkerInfo>> {
            Ok(self
                .lock()?
                .values()
                .filter(|w| w.last_heartbeat >= since_millis)
                .cloned()
                .collect())
        }
    }
}
