// Job Store Port (queue backend interface)

use crate::domain::{Job, JobId, JobState};
use crate::error::Result;
use async_trait::async_trait;

/// Parameters a worker supplies when claiming a job
#[derive(Debug, Clone)]
pub struct Claim {
    pub worker: String,
    pub now_millis: i64,
    /// Upper bound of a single backoff wait
    pub max_wait_ms: i64,
    /// Slack added on top of the worst-case execution time
    pub grace_ms: i64,
}

impl Claim {
    /// Lease deadline for a job: every attempt times out and every wait is maximal
    pub fn lease_for(&self, timeout_secs: u64, max_attempts: u32) -> i64 {
        let per_attempt = timeout_secs as i64 * 1000 + self.max_wait_ms;
        self.now_millis + i64::from(max_attempts.max(1)) * per_attempt + self.grace_ms
    }
}

/// Persistence interface for the job queue.
///
/// The store is the single source of truth for job state. `dequeue` hands a
/// job to exactly one caller; `complete` only succeeds for the owning worker
/// while the job is still RUNNING.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new PENDING job
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by ID
    async fn find_by_id(&self, id: &str) -> Result<Option<Job>>;

    /// Atomically claim the oldest PENDING job of `queue` (sets RUNNING, owner, lease)
    async fn dequeue(&self, queue: &str, claim: &Claim) -> Result<Option<Job>>;

    /// Persist the terminal outcome of a job owned by `job.worker_name`.
    ///
    /// Fails with `InvalidState` if the job is no longer RUNNING under that worker.
    async fn complete(&self, job: &Job) -> Result<()>;

    /// PENDING -> CANCELLED. `JobNotFound` if unknown, `Conflict` if not pending.
    async fn cancel_pending(&self, id: &str, now_millis: i64) -> Result<Job>;

    /// Fail RUNNING jobs whose lease ended before `now_millis`; returns their IDs
    async fn expire_leases(&self, now_millis: i64, reason: &str) -> Result<Vec<JobId>>;

    /// Count jobs in a state (all queues when `queue` is None)
    async fn count_by_state(&self, queue: Option<&str>, state: JobState) -> Result<i64>;

    /// Total number of persisted jobs
    async fn count(&self) -> Result<i64>;

    /// Liveness check without side effects
    async fn ping(&self) -> Result<()>;
}

// ============================================================================
// In-memory implementation (single process, tests and `memory://`)
// ============================================================================

pub mod memory {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Jobs kept in insertion order behind one mutex
    #[derive(Default)]
    pub struct InMemoryJobStore {
        jobs: Mutex<Vec<Job>>,
        unavailable: AtomicBool,
    }

    impl InMemoryJobStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Simulate a backend outage: every call fails with `Backend`
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Job>>> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(AppError::Backend("connection refused".to_string()));
            }
            self.jobs
                .lock()
                .map_err(|_| AppError::Internal("job store mutex poisoned".to_string()))
        }
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn insert(&self, job: &Job) -> Result<()> {
            let mut jobs = self.lock()?;
            if jobs.iter().any(|j| j.id == job.id) {
                return Err(AppError::Backend(format!(
                    "Unique constraint violation: job {}",
                    job.id
                )));
            }
            jobs.push(job.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<Job>> {
            Ok(self.lock()?.iter().find(|j| j.id == id).cloned())
        }

        async fn dequeue(&self, queue: &str, claim: &Claim) -> Result<Option<Job>> {
            let mut jobs = self.lock()?;
            let Some(job) = jobs
                .iter_mut()
                .find(|j| j.queue == queue && j.state == JobState::Pending)
            else {
                return Ok(None);
            };
            let lease = claim.lease_for(job.timeout_secs, job.max_attempts);
            job.start(claim.now_millis, claim.worker.clone(), lease)?;
            Ok(Some(job.clone()))
        }

        async fn complete(&self, job: &Job) -> Result<()> {
            let mut jobs = self.lock()?;
            let stored = jobs
                .iter_mut()
                .find(|j| j.id == job.id)
                .ok_or_else(|| AppError::JobNotFound(job.id.clone()))?;

            if stored.state != JobState::Running || stored.worker_name != job.worker_name {
                return Err(AppError::InvalidState(format!(
                    "Job {} is {} and no longer owned by {}",
                    job.id,
                    stored.state,
                    job.worker_name.as_deref().unwrap_or("-")
                )));
            }
            *stored = job.clone();
            Ok(())
        }

        async fn cancel_pending(&self, id: &str, now_millis: i64) -> Result<Job> {
            let mut jobs = self.lock()?;
            let job = jobs
                .iter_mut()
                .find(|j| j.id == id)
                .ok_or_else(|| AppError::JobNotFound(id.to_string()))?;
            if job.state != JobState::Pending {
                return Err(AppError::Conflict(format!(
                    "Job {} is {} and can no longer be cancelled",
                    id, job.state
                )));
            }
            job.cancel(now_millis)?;
            Ok(job.clone())
        }

        async fn expire_leases(&self, now_millis: i64, reason: &str) -> Result<Vec<JobId>> {
            let mut jobs = self.lock()?;
            let mut expired = Vec::new();
            for job in jobs.iter_mut().filter(|j| j.state == JobState::Running) {
                if matches!(job.lease_expires_at, Some(lease) if lease < now_millis) {
                    job.expire_lease(now_millis, reason)?;
                    expired.push(job.id.clone());
                }
            }
            Ok(expired)
        }

        async fn count_by_state(&self, queue: Option<&str>, state: JobState) -> Result<i64> {
            let jobs = self.lock()?;
            Ok(jobs
                .iter()
                .filter(|j| j.state == state && queue.map_or(true, |q| j.queue == q))
                .count() as i64)
        }

        async fn count(&self) -> Result<i64> {
            Ok(self.lock()?.len() as i64)
        }

        async fn ping(&self) -> Result<()> {
            self.lock().map(|_| ())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::domain::JobPayload;

        fn claim(worker: &str, now: i64) -> Claim {
            Claim {
                worker: worker.to_string(),
                now_millis: now,
                max_wait_ms: 1_000,
                grace_ms: 500,
            }
        }

        #[tokio::test]
        async fn test_dequeue_is_fifo_and_exclusive() {
            let store = InMemoryJobStore::new();
            let first = Job::new_test("echo", JobPayload::default());
            let second = Job::new_test("echo", JobPayload::default());
            store.insert(&first).await.unwrap();
            store.insert(&second).await.unwrap();

            let a = store.dequeue("test_queue", &claim("w-1", 10)).await.unwrap();
            let b = store.dequeue("test_queue", &claim("w-2", 10)).await.unwrap();
            let c = store.dequeue("test_queue", &claim("w-3", 10)).await.unwrap();

            assert_eq!(a.unwrap().id, first.id);
            assert_eq!(b.unwrap().id, second.id);
            assert!(c.is_none());
        }

        #[tokio::test]
        async fn test_lease_covers_every_attempt() {
            let store = InMemoryJobStore::new();
            let job = Job::new_test("echo", JobPayload::default()); // 5s timeout, 3 attempts
            store.insert(&job).await.unwrap();

            let claimed = store
                .dequeue("test_queue", &claim("w-1", 0))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(claimed.lease_expires_at, Some(3 * (5_000 + 1_000) + 500));
        }

        #[tokio::test]
        async fn test_complete_rejects_foreign_owner() {
            let store = InMemoryJobStore::new();
            let job = Job::new_test("echo", JobPayload::default());
            store.insert(&job).await.unwrap();

            let mut claimed = store
                .dequeue("test_queue", &claim("w-1", 0))
                .await
                .unwrap()
                .unwrap();
            claimed.worker_name = Some("w-2".to_string());
            claimed.succeed(5, serde_json::json!({}), 0).unwrap();

            let err = store.complete(&claimed).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidState(_)));
        }

        #[tokio::test]
        async fn test_unavailable_backend_fails_ping() {
            let store = InMemoryJobStore::new();
            assert!(store.ping().await.is_ok());
            store.set_unavailable(true);
            assert!(store.ping().await.unwrap_err().is_backend());
        }
    }
}
