//! Queue backend selection from the configured URL

use anyhow::{bail, Context, Result};
use scanq_core::port::job_store::memory::InMemoryJobStore;
use scanq_core::port::worker_registry::memory::InMemoryWorkerRegistry;
use scanq_core::port::{JobStore, WorkerRegistry};
use scanq_infra_sqlite::{connect, SqliteJobStore, SqliteWorkerRegistry};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const SQLITE_FILE_PREFIX: &str = "sqlite://";

/// Job store and worker registry sharing one backend
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn JobStore>,
    pub workers: Arc<dyn WorkerRegistry>,
    /// True when state only lives inside this process
    pub in_process: bool,
}

/// Expand `~` in the file part of a `sqlite://` URL and create its directory
fn prepare_sqlite_url(url: &str) -> Result<String> {
    let Some(rest) = url.strip_prefix(SQLITE_FILE_PREFIX) else {
        return Ok(url.to_string());
    };
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };
    let expanded = shellexpand::tilde(path).into_owned();
    if let Some(parent) = Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating queue directory {}", parent.display()))?;
        }
    }
    Ok(match query {
        Some(query) => format!("{}{}?{}", SQLITE_FILE_PREFIX, expanded, query),
        None => format!("{}{}", SQLITE_FILE_PREFIX, expanded),
    })
}

pub async fn open(url: &str) -> Result<Backend> {
    if url.starts_with("memory:") {
        info!("Using in-process memory queue backend");
        return Ok(Backend {
            store: Arc::new(InMemoryJobStore::new()),
            workers: Arc::new(InMemoryWorkerRegistry::new()),
            in_process: true,
        });
    }

    if !url.starts_with("sqlite:") {
        bail!("unsupported queue URL '{}' (expected sqlite://PATH or memory://)", url);
    }

    let in_process = url.contains(":memory:") || url.contains("mode=memory");
    if in_process {
        warn!("SQLite in-memory database: jobs are lost on exit");
    }
    let url = prepare_sqlite_url(url)?;
    let pool = connect(&url)
        .await
        .with_context(|| format!("opening queue backend {}", url))?;
    Ok(Backend {
        store: Arc::new(SqliteJobStore::new(pool.clone())),
        workers: Arc::new(SqliteWorkerRegistry::new(pool)),
        in_process,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_kept_and_directory_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("queue.db");
        let url = prepare_sqlite_url(&format!("sqlite://{}?mode=rwc", path.display())).unwrap();

        assert_eq!(url, format!("sqlite://{}?mode=rwc", path.display()));
        assert!(dir.path().join("a").is_dir());
        assert_eq!(prepare_sqlite_url("sqlite::memory:").unwrap(), "sqlite::memory:");
    }

    #[tokio::test]
    async fn test_memory_backend() {
        let backend = open("memory://").await.unwrap();
        assert!(backend.in_process);
        assert_eq!(backend.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sqlite_backend_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("queue.db");
        let backend = open(&format!("sqlite://{}", db.display())).await.unwrap();

        assert!(!backend.in_process);
        assert!(db.exists());
        backend.store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_scheme_rejected() {
        assert!(open("redis://localhost:6379").await.is_err());
    }
}
