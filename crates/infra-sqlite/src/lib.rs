// scanq Infrastructure - SQLite Queue Backend
// Implements: JobStore, WorkerRegistry

mod connection;
mod error;
mod job_store;
mod migration;
mod worker_registry;

pub use connection::{connect, create_pool};
pub use job_store::SqliteJobStore;
pub use migration::run_migrations;
pub use worker_registry::SqliteWorkerRegistry;

// Note: sqlx::Error conversion is handled by `error::map_sqlx_error`
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
