// Lease recovery - fails RUNNING jobs whose worker stopped reporting
use crate::domain::JobId;
use crate::error::Result;
use crate::port::{JobStore, TimeProvider};
use std::sync::Arc;
use tracing::{info, warn};

/// Error recorded on jobs whose lease ran out
pub const LEASE_EXPIRED_REASON: &str = "worker lease expired";

/// Detects jobs abandoned by a crashed worker.
///
/// A claimed job carries a lease covering every attempt timing out plus every
/// backoff wait. A job still RUNNING past its lease cannot be making progress
/// and is moved to FAILED instead of being re-run.
pub struct LeaseReaper {
    store: Arc<dyn JobStore>,
    time_provider: Arc<dyn TimeProvider>,
}

impl LeaseReaper {
    pub fn new(store: Arc<dyn JobStore>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            store,
            time_provider,
        }
    }

    /// Fail every job whose lease has ended; returns their IDs
    pub async fn reap_expired(&self) -> Result<Vec<JobId>> {
        let now = self.time_provider.now_millis();
        let expired = self.store.expire_leases(now, LEASE_EXPIRED_REASON).await?;

        if expired.is_empty() {
            info!("Lease check: no abandoned jobs");
        } else {
            for id in &expired {
                warn!(job_id = %id, "Job lease expired, marked FAILED");
            }
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Job, JobPayload, JobState};
    use crate::port::job_store::memory::InMemoryJobStore;
    use crate::port::time_provider::ManualTimeProvider;
    use crate::port::Claim;

    #[tokio::test]
    async fn test_expired_lease_fails_job() {
        let store = Arc::new(InMemoryJobStore::new());
        let clock = Arc::new(ManualTimeProvider::new(0));
        let job = Job::new_test("echo", JobPayload::default());
        store.insert(&job).await.unwrap();

        let claim = Claim {
            worker: "w-1".into(),
            now_millis: 0,
            max_wait_ms: 1_000,
            grace_ms: 0,
        };
        store.dequeue("test_queue", &claim).await.unwrap().unwrap();

        let reaper = LeaseReaper::new(store.clone(), clock.clone());
        assert!(reaper.reap_expired().await.unwrap().is_empty());

        clock.advance(3 * 6_000 + 1);
        let expired = reaper.reap_expired().await.unwrap();
        assert_eq!(expired, vec![job.id.clone()]);

        let stored = store.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(stored.error.as_deref(), Some(LEASE_EXPIRED_REASON));
        assert!(stored.finished_at.is_some());
        assert_eq!(stored.retry_count, 2);
    }

    #[tokio::test]
    async fn test_pending_jobs_are_untouched() {
        let store = Arc::new(InMemoryJobStore::new());
        let clock = Arc::new(ManualTimeProvider::new(i64::MAX / 2));
        let job = Job::new_test("echo", JobPayload::default());
        store.insert(&job).await.unwrap();

        let reaper = LeaseReaper::new(store.clone(), clock);
        assert!(reaper.reap_expired().await.unwrap().is_empty());
        let stored = store.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Pending);
    }
}
