//! Durability over the SQLite backend: restarts, crashed workers and
//! several pools competing for one queue.

mod common;

use common::{temp_db, Stack, StackOptions, QUEUE};
use scanq_core::application::ModuleRegistry;
use scanq_core::domain::{JobState, ModuleDescriptor};
use scanq_core::port::module_unit::mocks::{Behavior, ScriptedLoader, ScriptedUnit};
use scanq_core::port::{Claim, JobStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pending_jobs_survive_restart() {
    let (_dir, url) = temp_db();

    let producer = Stack::start_on(
        &url,
        StackOptions {
            workers: 0,
            ..StackOptions::default()
        },
    )
    .await;
    let mut ids = Vec::new();
    for n in 0..3 {
        ids.push(
            producer
                .submit_ok(json!({"module": "echo", "payload": {"n": n}}))
                .await,
        );
    }
    producer.stop().await;

    let consumer = Stack::start_on(&url, StackOptions::default()).await;
    for (n, id) in ids.iter().enumerate() {
        let job = consumer.wait_terminal(id).await;
        assert_eq!(job["status"], "SUCCESS");
        assert_eq!(job["result"], json!({"echo": {"n": n}}));
    }
    consumer.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abandoned_running_job_fails_on_lease_expiry() {
    let (_dir, url) = temp_db();

    let before = Stack::start_on(
        &url,
        StackOptions {
            workers: 0,
            ..StackOptions::default()
        },
    )
    .await;
    let job_id = before
        .submit_ok(json!({"module": "echo", "timeout": 1}))
        .await;

    // A worker that claimed the job long ago and never came back
    let claim = Claim {
        worker: "crashed.1.1".to_string(),
        now_millis: 1_000,
        max_wait_ms: 10,
        grace_ms: 10,
    };
    let claimed = before.store.dequeue(QUEUE, &claim).await.unwrap().unwrap();
    assert_eq!(claimed.id, job_id);
    before.stop().await;

    let after = Stack::start_on(&url, StackOptions::default()).await;
    let job = after.wait_terminal(&job_id).await;
    assert_eq!(job["status"], "FAILED");
    assert_eq!(job["meta"]["error"], "worker lease expired");
    assert_eq!(job["meta"]["worker"], "crashed.1.1");
    assert_eq!(job["meta"]["retries"], 2);
    assert!(job["result"].is_null());
    after.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_competing_pools_run_each_job_once() {
    let (_dir, url) = temp_db();
    let unit = ScriptedUnit::new().with_function(
        "echo",
        Behavior::Sleep(Duration::from_millis(20)),
        true,
    );
    let loader = Arc::new(ScriptedLoader::new().with_unit("diagnostics", unit));
    let registry = Arc::new(
        ModuleRegistry::new(vec![ModuleDescriptor::function(
            "echo",
            "diagnostics",
            "echo",
            true,
            "",
        )])
        .unwrap(),
    );
    let options = || StackOptions {
        workers: 3,
        max_attempts: 1,
        loader: loader.clone(),
        registry: Arc::clone(&registry),
    };

    let first = Stack::start_on(&url, options()).await;
    let second = Stack::start_on(&url, options()).await;

    let mut ids = Vec::new();
    for n in 0..20 {
        let stack = if n % 2 == 0 { &first } else { &second };
        ids.push(stack.submit_ok(json!({"module": "echo"})).await);
    }
    for id in &ids {
        assert_eq!(first.wait_terminal(id).await["status"], "SUCCESS");
    }

    assert_eq!(
        first
            .store
            .count_by_state(Some(QUEUE), JobState::Success)
            .await
            .unwrap(),
        20
    );
    assert_eq!(loader.unit("diagnostics").unwrap().calls("echo"), 20);

    let (status, body) = first.get("/api/health/workers").await;
    assert_eq!(status, 200);
    assert_eq!(body["count"], 6);

    first.stop().await;
    second.stop().await;
}
