// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod job_store;
pub mod module_unit;
pub mod time_provider;
pub mod worker_registry;

// Re-exports
pub use id_provider::IdProvider;
pub use job_store::{Claim, JobStore};
pub use module_unit::{EntryPoint, ModuleFailure, ModuleLoader, ModuleOutput, ModuleUnit};
pub use time_provider::TimeProvider;
pub use worker_registry::WorkerRegistry;
