//! scanqd - scanq daemon
//! Serves the Control API, runs the module worker pool, or both.

mod backend;
mod config;
mod telemetry;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use config::{Cli, Command, DaemonConfig};
use scanq_api_http::HttpServer;
use scanq_core::application::{
    shutdown_channel, JobQueue, ModuleInvoker, ModuleRegistry, RetryExecutor, ShutdownSender,
    ShutdownToken, WorkerPool,
};
use scanq_core::port::id_provider::UuidProvider;
use scanq_core::port::time_provider::SystemTimeProvider;
use scanq_modules::{builtin_registry, BuiltinLoader};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = telemetry::init_tracing(cli.config.log_format)?;

    info!("scanqd v{} starting", scanq_core::VERSION);
    let config = cli.config.clone();
    config.validate()?;

    let backend = backend::open(&config.queue_url).await?;
    let registry = Arc::new(builtin_registry().context("building module registry")?);
    info!(modules = ?registry.keys(), queue = %config.queue, "Module registry ready");

    let command = cli.command();
    if command == Command::Serve && backend.in_process {
        warn!("In-process backend with no local workers: submitted jobs will never run");
    }

    let (shutdown_tx, shutdown) = shutdown_channel();
    let shutdown_tx = Arc::new(shutdown_tx);
    tokio::spawn(signal_shutdown(Arc::clone(&shutdown_tx)));

    let run_api_part = matches!(command, Command::Serve | Command::All);
    let run_worker_part = matches!(command, Command::Worker | Command::All);

    let api = async {
        if !run_api_part {
            return Ok(());
        }
        let result = run_api(&config, &backend, Arc::clone(&registry), shutdown.clone()).await;
        if result.is_err() {
            // Workers in the same process stop with the API
            shutdown_tx.shutdown();
        }
        result
    };
    let workers = async {
        if !run_worker_part {
            return Ok(());
        }
        run_workers(&config, &backend, Arc::clone(&registry), shutdown.clone()).await
    };

    let (api_result, worker_result) = tokio::join!(api, workers);
    if let Err(e) = &api_result {
        error!(error = %e, "Control API failed");
    }
    if let Err(e) = &worker_result {
        error!(error = %e, "Worker pool failed");
    }

    info!("Shutdown complete");
    api_result.and(worker_result)
}

async fn run_api(
    config: &DaemonConfig,
    backend: &backend::Backend,
    registry: Arc<ModuleRegistry>,
    shutdown: ShutdownToken,
) -> Result<()> {
    let queue = Arc::new(JobQueue::new(
        Arc::clone(&backend.store),
        Arc::clone(&backend.workers),
        registry,
        Arc::new(UuidProvider),
        Arc::new(SystemTimeProvider),
        config.job_defaults(),
    ));
    HttpServer::new(config.http_config(), queue)
        .run(shutdown)
        .await
        .with_context(|| format!("serving Control API on {}:{}", config.host, config.port))
}

async fn run_workers(
    config: &DaemonConfig,
    backend: &backend::Backend,
    registry: Arc<ModuleRegistry>,
    shutdown: ShutdownToken,
) -> Result<()> {
    let invoker = Arc::new(ModuleInvoker::new(registry, Arc::new(BuiltinLoader)));
    let executor = RetryExecutor::new(invoker, config.retry_policy());
    let pool = WorkerPool::new(
        &config.pool_config(),
        Arc::clone(&backend.store),
        Arc::clone(&backend.workers),
        executor,
        Arc::new(SystemTimeProvider),
    );
    pool.run(shutdown).await.context("running worker pool")
}

/// Ctrl-C (or SIGTERM) requests a graceful stop
async fn signal_shutdown(tx: Arc<ShutdownSender>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown signal received, draining in-flight jobs");
    tx.shutdown();
}
