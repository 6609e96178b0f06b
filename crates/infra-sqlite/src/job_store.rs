// SQLite JobStore Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use scanq_core::domain::{Job, JobId, JobPayload, JobState};
use scanq_core::error::{AppError, Result};
use scanq_core::port::{Claim, JobStore};
use sqlx::SqlitePool;

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let result = job.result.as_ref().map(|v| v.to_string());

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, queue, module_key, payload, state,
                created_at, started_at, finished_at,
                timeout_secs, max_attempts, retry_count,
                result, error, runtime_seconds,
                worker_name, lease_expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.queue)
        .bind(&job.module_key)
        .bind(job.payload.to_value().to_string())
        .bind(job.state.as_str())
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.timeout_secs as i64)
        .bind(i64::from(job.max_attempts))
        .bind(i64::from(job.retry_count))
        .bind(&result)
        .bind(&job.error)
        .bind(job.runtime_seconds)
        .bind(&job.worker_name)
        .bind(job.lease_expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn dequeue(&self, queue: &str, claim: &Claim) -> Result<Option<Job>> {
        // Single statement: the sub-select and the state flip happen under one write lock,
        // so two workers can never claim the same row.
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET state = 'RUNNING',
                started_at = ?,
                worker_name = ?,
                lease_expires_at = ? + MAX(max_attempts, 1) * (timeout_secs * 1000 + ?) + ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = ? AND state = 'PENDING'
                ORDER BY created_at ASC, rowid ASC
                LIMIT 1
            )
            AND state = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(claim.now_millis)
        .bind(&claim.worker)
        .bind(claim.now_millis)
        .bind(claim.max_wait_ms)
        .bind(claim.grace_ms)
        .bind(queue)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn complete(&self, job: &Job) -> Result<()> {
        if !job.state.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "Job {} cannot complete in state {}",
                job.id, job.state
            )));
        }
        let result = job.result.as_ref().map(|v| v.to_string());

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, finished_at = ?, retry_count = ?,
                result = ?, error = ?, runtime_seconds = ?,
                lease_expires_at = NULL
            WHERE id = ? AND state = 'RUNNING' AND worker_name = ?
            "#,
        )
        .bind(job.state.as_str())
        .bind(job.finished_at)
        .bind(i64::from(job.retry_count))
        .bind(&result)
        .bind(&job.error)
        .bind(job.runtime_seconds)
        .bind(&job.id)
        .bind(&job.worker_name)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        if updated == 0 {
            return match self.find_by_id(&job.id).await? {
                None => Err(AppError::JobNotFound(job.id.clone())),
                Some(stored) => Err(AppError::InvalidState(format!(
                    "Job {} is {} and no longer owned by {}",
                    job.id,
                    stored.state,
                    job.worker_name.as_deref().unwrap_or("-")
                ))),
            };
        }
        Ok(())
    }

    async fn cancel_pending(&self, id: &str, now_millis: i64) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET state = 'CANCELLED', finished_at = ?
            WHERE id = ? AND state = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(now_millis)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row.into_job(),
            None => match self.find_by_id(id).await? {
                None => Err(AppError::JobNotFound(id.to_string())),
                Some(job) => Err(AppError::Conflict(format!(
                    "Job {} is {} and can no longer be cancelled",
                    id, job.state
                ))),
            },
        }
    }

    async fn expire_leases(&self, now_millis: i64, reason: &str) -> Result<Vec<JobId>> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE jobs
            SET state = 'FAILED',
                finished_at = ?,
                error = ?,
                runtime_seconds = MAX(? - started_at, 0) / 1000.0,
                retry_count = MAX(max_attempts - 1, 0),
                lease_expires_at = NULL
            WHERE state = 'RUNNING' AND lease_expires_at < ?
            RETURNING id
            "#,
        )
        .bind(now_millis)
        .bind(reason)
        .bind(now_millis)
        .bind(now_millis)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(ids)
    }

    async fn count_by_state(&self, queue: Option<&str>, state: JobState) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE state = ? AND (? IS NULL OR queue = ?)",
        )
        .bind(state.as_str())
        .bind(queue)
        .bind(queue)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    queue: String,
    module_key: String,
    payload: String,
    state: String,
    created_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    timeout_secs: i64,
    max_attempts: i64,
    retry_count: i64,
    result: Option<String>,
    error: Option<String>,
    runtime_seconds: Option<f64>,
    worker_name: Option<String>,
    lease_expires_at: Option<i64>,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let state = JobState::parse(&self.state).ok_or_else(|| {
            AppError::Internal(format!("Unknown job state in store: {}", self.state))
        })?;
        let payload = JobPayload::from_value(serde_json::from_str(&self.payload)?)?;
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Job {
            id: self.id,
            queue: self.queue,
            module_key: self.module_key,
            payload,
            state,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            timeout_secs: self.timeout_secs.max(0) as u64,
            max_attempts: u32::try_from(self.max_attempts).unwrap_or(u32::MAX),
            retry_count: u32::try_from(self.retry_count).unwrap_or(0),
            result,
            error: self.error,
            runtime_seconds: self.runtime_seconds,
            worker_name: self.worker_name,
            lease_expires_at: self.lease_expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect, create_pool, run_migrations};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    async fn setup_test_db() -> SqliteJobStore {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteJobStore::new(pool)
    }

    fn claim(worker: &str, now: i64) -> Claim {
        Claim {
            worker: worker.to_string(),
            now_millis: now,
            max_wait_ms: 30_000,
            grace_ms: 30_000,
        }
    }

    fn job(module: &str) -> Job {
        Job::new_test(
            module,
            JobPayload::from_value(json!({"target": "10.0.0.5", "ports": [22, 80]})).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = setup_test_db().await;
        let job = job("tcp_probe");
        store.insert(&job).await.unwrap();

        let found = store.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(found.id, job.id);
        assert_eq!(found.module_key, "tcp_probe");
        assert_eq!(found.state, JobState::Pending);
        assert_eq!(found.payload, job.payload);
        assert_eq!(found.timeout_secs, 5);
        assert_eq!(found.max_attempts, 3);
        assert!(found.started_at.is_none());

        assert!(store.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_is_backend_error() {
        let store = setup_test_db().await;
        let job = job("echo");
        store.insert(&job).await.unwrap();
        let err = store.insert(&job).await.unwrap_err();
        assert!(err.to_string().contains("Unique constraint"));
    }

    #[tokio::test]
    async fn test_dequeue_fifo_and_lease() {
        let store = setup_test_db().await;
        let first = job("echo");
        let second = job("echo");
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        let c = claim("w-1", 50_000);
        let popped = store.dequeue("test_queue", &c).await.unwrap().unwrap();
        assert_eq!(popped.id, first.id);
        assert_eq!(popped.state, JobState::Running);
        assert_eq!(popped.started_at, Some(50_000));
        assert_eq!(popped.worker_name.as_deref(), Some("w-1"));
        assert_eq!(
            popped.lease_expires_at,
            Some(c.lease_for(popped.timeout_secs, popped.max_attempts))
        );

        let next = store.dequeue("test_queue", &claim("w-2", 50_001)).await.unwrap().unwrap();
        assert_eq!(next.id, second.id);
        assert!(store.dequeue("test_queue", &claim("w-3", 50_002)).await.unwrap().is_none());
        assert!(store.dequeue("other_queue", &claim("w-3", 50_002)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_persists_outcome() {
        let store = setup_test_db().await;
        let job = job("echo");
        store.insert(&job).await.unwrap();

        let mut running = store.dequeue("test_queue", &claim("w-1", 1_000)).await.unwrap().unwrap();
        running.succeed(3_250, json!({"open_ports": [22]}), 1).unwrap();
        store.complete(&running).await.unwrap();

        let stored = store.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Success);
        assert_eq!(stored.result, Some(json!({"open_ports": [22]})));
        assert_eq!(stored.finished_at, Some(3_250));
        assert_eq!(stored.runtime_seconds, Some(2.25));
        assert_eq!(stored.retry_count, 1);
        assert!(stored.lease_expires_at.is_none());
    }

    #[tokio::test]
    async fn test_complete_rejected_after_lease_expiry() {
        let store = setup_test_db().await;
        let job = job("echo");
        store.insert(&job).await.unwrap();

        let mut running = store.dequeue("test_queue", &claim("w-1", 0)).await.unwrap().unwrap();
        let lease = running.lease_expires_at.unwrap();
        let expired = store.expire_leases(lease + 1, "lease expired").await.unwrap();
        assert_eq!(expired, vec![job.id.clone()]);

        running.succeed(lease + 2, json!({}), 0).unwrap();
        let err = store.complete(&running).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        let stored = store.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(stored.error.as_deref(), Some("lease expired"));
        assert!(stored.finished_at.is_some());
        assert_eq!(stored.retry_count, stored.max_attempts - 1);
        assert!(stored.lease_expires_at.is_none());
    }

    #[tokio::test]
    async fn test_expire_leases_ignores_live_leases() {
        let store = setup_test_db().await;
        store.insert(&job("echo")).await.unwrap();
        let running = store.dequeue("test_queue", &claim("w-1", 0)).await.unwrap().unwrap();

        let expired = store
            .expire_leases(running.lease_expires_at.unwrap() - 1, "lease expired")
            .await
            .unwrap();
        assert!(expired.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_pending() {
        let store = setup_test_db().await;
        let running = job("echo");
        let pending = job("echo");
        store.insert(&running).await.unwrap();
        store.insert(&pending).await.unwrap();
        store.dequeue("test_queue", &claim("w-1", 0)).await.unwrap();

        let cancelled = store.cancel_pending(&pending.id, 99).await.unwrap();
        assert_eq!(cancelled.state, JobState::Cancelled);
        assert_eq!(cancelled.finished_at, Some(99));

        assert!(matches!(
            store.cancel_pending(&running.id, 100).await.unwrap_err(),
            AppError::Conflict(_)
        ));
        assert!(matches!(
            store.cancel_pending("missing", 100).await.unwrap_err(),
            AppError::JobNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_counts_and_ping() {
        let store = setup_test_db().await;
        for _ in 0..3 {
            store.insert(&job("echo")).await.unwrap();
        }
        store.dequeue("test_queue", &claim("w-1", 0)).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 3);
        assert_eq!(
            store.count_by_state(Some("test_queue"), JobState::Pending).await.unwrap(),
            2
        );
        assert_eq!(store.count_by_state(None, JobState::Running).await.unwrap(), 1);
        assert_eq!(
            store.count_by_state(Some("other"), JobState::Pending).await.unwrap(),
            0
        );
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_pool_is_backend_error() {
        let store = setup_test_db().await;
        store.pool().close().await;
        assert!(store.ping().await.unwrap_err().is_backend());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dequeue_never_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("queue.db").display());
        let store = Arc::new(SqliteJobStore::new(connect(&url).await.unwrap()));

        let mut ids = HashSet::new();
        for _ in 0..40 {
            let j = job("echo");
            ids.insert(j.id.clone());
            store.insert(&j).await.unwrap();
        }

        let workers = (0..8).map(|w| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(job) = store
                    .dequeue("test_queue", &claim(&format!("w-{}", w), 0))
                    .await
                    .unwrap()
                {
                    claimed.push(job.id);
                }
                claimed
            })
        });

        let mut seen = HashSet::new();
        for claimed in futures::future::join_all(workers).await {
            for id in claimed.unwrap() {
                assert!(seen.insert(id), "job claimed twice");
            }
        }
        assert_eq!(seen, ids);
    }
}
