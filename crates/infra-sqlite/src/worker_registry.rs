// SQLite WorkerRegistry Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use scanq_core::domain::{WorkerInfo, WorkerState};
use scanq_core::error::{AppError, Result};
use scanq_core::port::WorkerRegistry;
use sqlx::SqlitePool;

pub struct SqliteWorkerRegistry {
    pool: SqlitePool,
}

impl SqliteWorkerRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkerRegistry for SqliteWorkerRegistry {
    async fn register(&self, info: &WorkerInfo) -> Result<()> {
        let queues = serde_json::to_string(&info.queues)?;

        // birth_date is kept from the first registration
        sqlx::query(
            r#"
            INSERT INTO workers (
                name, state, queues, birth_date, last_heartbeat, current_job, orphaned_calls
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                state = excluded.state,
                queues = excluded.queues,
                last_heartbeat = excluded.last_heartbeat,
                current_job = excluded.current_job,
                orphaned_calls = excluded.orphaned_calls
            "#,
        )
        .bind(&info.name)
        .bind(info.state.as_str())
        .bind(queues)
        .bind(info.birth_date)
        .bind(info.last_heartbeat)
        .bind(&info.current_job)
        .bind(i64::try_from(info.orphaned_calls).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn deregister(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM workers WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_alive(&self, since_millis: i64) -> Result<Vec<WorkerInfo>> {
        let rows = sqlx::query_as::<_, WorkerRow>(
            "SELECT * FROM workers WHERE last_heartbeat >= ? ORDER BY name",
        )
        .bind(since_millis)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(WorkerRow::into_info).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WorkerRow {
    name: String,
    state: String,
    queues: String,
    birth_date: i64,
    last_heartbeat: i64,
    current_job: Option<String>,
    orphaned_calls: i64,
}

impl WorkerRow {
    fn into_info(self) -> Result<WorkerInfo> {
        let state = WorkerState::parse(&self.state).ok_or_else(|| {
            AppError::Internal(format!("Unknown worker state in store: {}", self.state))
        })?;
        Ok(WorkerInfo {
            name: self.name,
            state,
            queues: serde_json::from_str(&self.queues)?,
            birth_date: self.birth_date,
            last_heartbeat: self.last_heartbeat,
            current_job: self.current_job,
            orphaned_calls: self.orphaned_calls.max(0) as u64,
        })
    }
}
