// Module Invoker - lazy unit loading and deadline-bounded calls
//
// Blocking entry points run on a dedicated thread; on timeout the thread is
// left to finish on its own and the call is reported as orphaned. Async
// entry points run as tokio tasks and are aborted at the deadline.

use crate::application::registry::ModuleRegistry;
use crate::application::worker::{execute_guarded, panic_message, PanicGuardResult};
use crate::domain::{InvocationKind, JobPayload, ModuleDescriptor};
use crate::port::{EntryPoint, ModuleLoader, ModuleOutput, ModuleUnit};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, OnceCell};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Why a single module call did not produce a result
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvocationError {
    #[error("Unknown module: {0}")]
    UnknownModule(String),

    #[error("Module '{module}' could not be loaded: {message}")]
    Load { module: String, message: String },

    #[error("Module '{module}' timed out after {timeout:?}")]
    Timeout {
        module: String,
        timeout: Duration,
        /// The call kept running on its own thread after the deadline
        orphaned: bool,
    },

    #[error("Module '{module}' failed: {message}")]
    Failed { module: String, message: String },

    #[error("Module '{module}' panicked: {message}")]
    Panicked { module: String, message: String },
}

impl InvocationError {
    /// Everything except an unknown module is worth another attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(self, InvocationError::UnknownModule(_))
    }

    pub fn is_orphaned(&self) -> bool {
        matches!(self, InvocationError::Timeout { orphaned: true, .. })
    }
}

type UnitCell = Arc<OnceCell<Arc<dyn ModuleUnit>>>;

/// Process-wide cache of loaded units, keyed by normalized module key.
/// Concurrent first use of a key waits on one shared load.
#[derive(Default)]
struct UnitCache {
    cells: Mutex<HashMap<String, UnitCell>>,
}

impl UnitCache {
    fn cell(&self, key: &str) -> UnitCell {
        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(cells.entry(key.to_string()).or_default())
    }
}

/// Calls module entry points with a per-call deadline
pub struct ModuleInvoker {
    registry: Arc<ModuleRegistry>,
    loader: Arc<dyn ModuleLoader>,
    units: UnitCache,
}

impl ModuleInvoker {
    pub fn new(registry: Arc<ModuleRegistry>, loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            registry,
            loader,
            units: UnitCache::default(),
        }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Look up `key` and invoke it
    pub async fn invoke_key(
        &self,
        key: &str,
        payload: &JobPayload,
        timeout: Duration,
    ) -> Result<Value, InvocationError> {
        let descriptor = self
            .registry
            .lookup(key)
            .map_err(|_| InvocationError::UnknownModule(key.to_string()))?;
        self.invoke(descriptor, payload, timeout).await
    }

    /// Invoke the module once; loading the unit counts against `timeout`
    pub async fn invoke(
        &self,
        descriptor: &ModuleDescriptor,
        payload: &JobPayload,
        timeout: Duration,
    ) -> Result<Value, InvocationError> {
        let deadline = Instant::now() + timeout;
        let module = descriptor.key.clone();
        let timed_out = |orphaned| InvocationError::Timeout {
            module: module.clone(),
            timeout,
            orphaned,
        };

        let unit = timeout_at(deadline, self.load_unit(descriptor))
            .await
            .map_err(|_| timed_out(false))??;
        let entry = resolve(descriptor, unit.as_ref())?;

        debug!(module = %descriptor.key, is_async = descriptor.is_async, "Invoking module");
        match entry {
            EntryPoint::Async(f) => {
                call_async(&descriptor.key, f(payload.clone()), deadline, timed_out).await
            }
            EntryPoint::Blocking(f) => {
                let payload = payload.clone();
                call_blocking(&descriptor.key, move || f(payload), deadline, timed_out).await
            }
        }
    }

    async fn load_unit(
        &self,
        descriptor: &ModuleDescriptor,
    ) -> Result<Arc<dyn ModuleUnit>, InvocationError> {
        let cell = self.units.cell(&descriptor.normalized_key());
        cell.get_or_try_init(|| async {
            info!(module = %descriptor.key, unit = %descriptor.unit, "Loading module unit");
            self.loader.load(&descriptor.unit).await
        })
        .await
        .cloned()
        .map_err(|e| InvocationError::Load {
            module: descriptor.key.clone(),
            message: e.to_string(),
        })
    }
}

fn resolve(descriptor: &ModuleDescriptor, unit: &dyn ModuleUnit) -> Result<EntryPoint, InvocationError> {
    let load_error = |message: String| InvocationError::Load {
        module: descriptor.key.clone(),
        message,
    };

    let entry = match (descriptor.invocation_kind(), &descriptor.constructor_type) {
        (InvocationKind::Method, Some(type_name)) => unit
            .method(type_name, &descriptor.entry_point)
            .ok_or_else(|| {
                load_error(format!(
                    "method '{}::{}' not found in unit '{}'",
                    type_name, descriptor.entry_point, descriptor.unit
                ))
            })?,
        _ => unit.function(&descriptor.entry_point).ok_or_else(|| {
            load_error(format!(
                "function '{}' not found in unit '{}'",
                descriptor.entry_point, descriptor.unit
            ))
        })?,
    };

    if entry.is_async() != descriptor.is_async {
        return Err(load_error(format!(
            "entry point '{}' is {} but registered as {}",
            descriptor.entry_point,
            if entry.is_async() { "async" } else { "blocking" },
            if descriptor.is_async { "async" } else { "blocking" },
        )));
    }
    Ok(entry)
}

async fn call_async<Fut>(
    module: &str,
    call: Fut,
    deadline: Instant,
    timed_out: impl Fn(bool) -> InvocationError,
) -> Result<Value, InvocationError>
where
    Fut: Future<Output = ModuleOutput> + Send + 'static,
{
    let handle = tokio::spawn(call);
    let abort = handle.abort_handle();

    match timeout_at(deadline, handle).await {
        Ok(Ok(output)) => output.map_err(|e| failed(module, e.to_string())),
        Ok(Err(join_err)) if join_err.is_panic() => Err(InvocationError::Panicked {
            module: module.to_string(),
            message: panic_message(join_err.into_panic().as_ref()),
        }),
        Ok(Err(join_err)) => Err(failed(module, join_err.to_string())),
        Err(_) => {
            abort.abort();
            Err(timed_out(false))
        }
    }
}

async fn call_blocking<F>(
    module: &str,
    call: F,
    deadline: Instant,
    timed_out: impl Fn(bool) -> InvocationError,
) -> Result<Value, InvocationError>
where
    F: FnOnce() -> ModuleOutput + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name(format!("module-{}", module))
        .spawn(move || {
            let _ = tx.send(execute_guarded(AssertUnwindSafe(call)));
        })
        .map_err(|e| failed(module, format!("could not start module thread: {}", e)))?;

    match timeout_at(deadline, rx).await {
        Ok(Ok(PanicGuardResult::Success(output))) => output.map_err(|e| failed(module, e.to_string())),
        Ok(Ok(PanicGuardResult::Panicked(message))) => Err(InvocationError::Panicked {
            module: module.to_string(),
            message,
        }),
        Ok(Err(_)) => Err(failed(module, "module thread exited without a result".to_string())),
        Err(_) => {
            warn!(module = %module, "Blocking module call exceeded its deadline; thread left running");
            Err(timed_out(true))
        }
    }
}

fn failed(module: &str, message: String) -> InvocationError {
    InvocationError::Failed {
        module: module.to_string(),
        message,
    }
}
