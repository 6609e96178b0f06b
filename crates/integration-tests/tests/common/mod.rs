//! Shared harness: SQLite file backend, Control API on an ephemeral port,
//! and an optional worker pool running the built-in modules.
#![allow(dead_code)]

use scanq_api_http::{HttpServer, HttpServerConfig};
use scanq_core::application::{
    shutdown_channel, BackoffPolicy, JobDefaults, JobQueue, ModuleInvoker, ModuleRegistry,
    PoolConfig, RetryExecutor, RetryPolicy, ShutdownSender, WorkerPool,
};
use scanq_core::port::id_provider::UuidProvider;
use scanq_core::port::time_provider::SystemTimeProvider;
use scanq_core::port::ModuleLoader;
use scanq_infra_sqlite::{connect, SqliteJobStore, SqliteWorkerRegistry};
use scanq_modules::{builtin_registry, BuiltinLoader};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const QUEUE: &str = "scanq-tasks";

/// Millisecond backoff so retry scenarios finish quickly
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff: BackoffPolicy::new(0.0, Duration::from_millis(20), Duration::from_millis(50)),
    }
}

pub struct StackOptions {
    pub workers: usize,
    pub max_attempts: u32,
    pub loader: Arc<dyn ModuleLoader>,
    pub registry: Arc<ModuleRegistry>,
}

impl Default for StackOptions {
    fn default() -> Self {
        Self {
            workers: 2,
            max_attempts: 3,
            loader: Arc::new(BuiltinLoader),
            registry: Arc::new(builtin_registry().unwrap()),
        }
    }
}

pub struct Stack {
    pub base: String,
    pub client: reqwest::Client,
    pub store: Arc<SqliteJobStore>,
    pub workers: Arc<SqliteWorkerRegistry>,
    pub db_url: String,
    shutdown: ShutdownSender,
    tasks: Vec<JoinHandle<()>>,
    _dir: Option<TempDir>,
}

pub fn temp_db() -> (TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path: PathBuf = dir.path().join("queue.db");
    let url = format!("sqlite://{}", path.display());
    (dir, url)
}

impl Stack {
    pub async fn start(options: StackOptions) -> Self {
        let (dir, url) = temp_db();
        let mut stack = Self::start_on(&url, options).await;
        stack._dir = Some(dir);
        stack
    }

    /// Start against an existing database URL
    pub async fn start_on(db_url: &str, options: StackOptions) -> Self {
        let pool = connect(db_url).await.unwrap();
        let store = Arc::new(SqliteJobStore::new(pool.clone()));
        let workers = Arc::new(SqliteWorkerRegistry::new(pool));
        let (shutdown, token) = shutdown_channel();
        let mut tasks = Vec::new();

        let queue = Arc::new(JobQueue::new(
            store.clone(),
            workers.clone(),
            Arc::clone(&options.registry),
            Arc::new(UuidProvider),
            Arc::new(SystemTimeProvider),
            JobDefaults {
                queue: QUEUE.to_string(),
                timeout_secs: 300,
                max_attempts: options.max_attempts,
            },
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = HttpServer::new(HttpServerConfig::default(), queue);
        let api_token = token.clone();
        tasks.push(tokio::spawn(async move {
            server.serve(listener, api_token).await.unwrap();
        }));

        if options.workers > 0 {
            let invoker = Arc::new(ModuleInvoker::new(
                Arc::clone(&options.registry),
                Arc::clone(&options.loader),
            ));
            let pool = WorkerPool::new(
                &PoolConfig {
                    size: options.workers,
                    queue: QUEUE.to_string(),
                    name_prefix: "it".to_string(),
                },
                store.clone(),
                workers.clone(),
                RetryExecutor::new(invoker, fast_retry(options.max_attempts)),
                Arc::new(SystemTimeProvider),
            );
            tasks.push(tokio::spawn(async move {
                pool.run(token).await.unwrap();
            }));
        }

        Self {
            base,
            client: reqwest::Client::new(),
            store,
            workers,
            db_url: db_url.to_string(),
            shutdown,
            tasks,
            _dir: None,
        }
    }

    pub async fn submit(&self, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}/api/tasks", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        (resp.status().as_u16(), resp.json().await.unwrap())
    }

    pub async fn submit_ok(&self, body: Value) -> String {
        let (status, resp) = self.submit(body).await;
        assert_eq!(status, 202, "submit failed: {}", resp);
        resp["job_id"].as_str().unwrap().to_string()
    }

    pub async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        (resp.status().as_u16(), resp.json().await.unwrap())
    }

    /// Poll until the job is SUCCESS, FAILED or CANCELLED
    pub async fn wait_terminal(&self, job_id: &str) -> Value {
        for _ in 0..400 {
            let (status, job) = self.get(&format!("/api/tasks/{}", job_id)).await;
            assert_eq!(status, 200);
            if matches!(job["status"].as_str(), Some("SUCCESS" | "FAILED" | "CANCELLED")) {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("job {} did not finish", job_id);
    }

    pub async fn stop(self) {
        self.shutdown.shutdown();
        for task in self.tasks {
            task.await.unwrap();
        }
    }
}
