// Application Layer - Use Cases and Business Logic

pub mod invoker;
pub mod queue;
pub mod recovery;
pub mod registry;
pub mod retry;
pub mod worker;

// Re-exports
pub use invoker::{InvocationError, ModuleInvoker};
pub use queue::{EnqueueRequest, JobDefaults, JobQueue};
pub use recovery::LeaseReaper;
pub use registry::ModuleRegistry;
pub use retry::{BackoffPolicy, RetryError, RetryExecutor, RetryOutcome, RetryPolicy};
pub use worker::{shutdown_channel, PoolConfig, ShutdownSender, ShutdownToken, Worker, WorkerPool};
