// Domain Layer - Pure business logic and entities

pub mod error;
pub mod health;
pub mod job;
pub mod module;

// Re-exports
pub use error::DomainError;
pub use health::{BackendStatus, QueueHealth, WorkerInfo, WorkerState};
pub use job::{Job, JobId, JobPayload, JobState, QueueName};
pub use module::{InvocationKind, ModuleDescriptor, ModuleKey};
