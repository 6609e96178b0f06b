// Module Unit Port
// A code unit exports free functions and constructible types; the loader resolves
// units by name. Entry points are statically typed closures, never reflection.

use crate::domain::JobPayload;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;

/// Failure raised by a module's own code
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ModuleFailure(pub String);

impl ModuleFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// What a module call produces
pub type ModuleOutput = Result<serde_json::Value, ModuleFailure>;

type BlockingFn = dyn Fn(JobPayload) -> ModuleOutput + Send + Sync;
type AsyncFn = dyn Fn(JobPayload) -> BoxFuture<'static, ModuleOutput> + Send + Sync;

/// A resolved, callable entry point
#[derive(Clone)]
pub enum EntryPoint {
    /// Runs to completion on the calling thread; cannot be interrupted
    Blocking(Arc<BlockingFn>),
    /// Cooperatively scheduled; dropping the future cancels the call
    Async(Arc<AsyncFn>),
}

impl EntryPoint {
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(JobPayload) -> ModuleOutput + Send + Sync + 'static,
    {
        EntryPoint::Blocking(Arc::new(f))
    }

    pub fn future<F>(f: F) -> Self
    where
        F: Fn(JobPayload) -> BoxFuture<'static, ModuleOutput> + Send + Sync + 'static,
    {
        EntryPoint::Async(Arc::new(f))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, EntryPoint::Async(_))
    }
}

impl std::fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryPoint::Blocking(_) => f.write_str("EntryPoint::Blocking"),
            EntryPoint::Async(_) => f.write_str("EntryPoint::Async"),
        }
    }
}

/// A loaded code unit
pub trait ModuleUnit: Send + Sync {
    /// Free function exported under `name`
    fn function(&self, name: &str) -> Option<EntryPoint>;

    /// `method` on a fresh no-argument instance of `type_name`, constructed per call
    fn method(&self, type_name: &str, method: &str) -> Option<EntryPoint>;
}

/// Resolves code units by name (the unit reference of a module descriptor)
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(&self, unit: &str) -> Result<Arc<dyn ModuleUnit>, ModuleFailure>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted module behavior
    #[derive(Debug, Clone)]
    pub enum Behavior {
        /// Return `{"echo": payload}`
        Echo,
        /// Always fail with message
        Fail(String),
        /// Fail the first N calls, then echo
        FailTimes(usize),
        /// Sleep, then echo
        Sleep(Duration),
        /// Panic with message
        Panic(String),
    }

    /// Shared call bookkeeping for one scripted entry point
    #[derive(Default)]
    struct Calls {
        count: AtomicUsize,
    }

    fn run_sync(behavior: &Behavior, calls: &Calls, payload: JobPayload) -> ModuleOutput {
        let n = calls.count.fetch_add(1, Ordering::SeqCst);
        match behavior {
            Behavior::Echo => Ok(serde_json::json!({ "echo": payload })),
            Behavior::Fail(msg) => Err(ModuleFailure::new(msg.clone())),
            Behavior::FailTimes(times) if n < *times => {
                Err(ModuleFailure::new(format!("scripted failure #{}", n + 1)))
            }
            Behavior::FailTimes(_) => Ok(serde_json::json!({ "echo": payload })),
            Behavior::Sleep(d) => {
                std::thread::sleep(*d);
                Ok(serde_json::json!({ "echo": payload }))
            }
            Behavior::Panic(msg) => panic!("{}", msg),
        }
    }

    async fn run_async(behavior: Behavior, calls: Arc<Calls>, payload: JobPayload) -> ModuleOutput {
        if let Behavior::Sleep(d) = behavior {
            calls.count.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(d).await;
            return Ok(serde_json::json!({ "echo": payload }));
        }
        run_sync(&behavior, &calls, payload)
    }

    struct Scripted {
        behavior: Behavior,
        is_async: bool,
        calls: Arc<Calls>,
    }

    impl Scripted {
        fn entry(&self) -> EntryPoint {
            let behavior = self.behavior.clone();
            let calls = Arc::clone(&self.calls);
            if self.is_async {
                EntryPoint::future(move |payload| {
                    Box::pin(run_async(behavior.clone(), Arc::clone(&calls), payload))
                })
            } else {
                EntryPoint::blocking(move |payload| run_sync(&behavior, &calls, payload))
            }
        }
    }

    /// Code unit whose entry points follow scripted behaviors
    #[derive(Default)]
    pub struct ScriptedUnit {
        functions: HashMap<String, Scripted>,
        methods: HashMap<(String, String), Scripted>,
        constructed: Arc<AtomicUsize>,
    }

    impl ScriptedUnit {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_function(mut self, name: &str, behavior: Behavior, is_async: bool) -> Self {
            self.functions.insert(
                name.to_string(),
                Scripted {
                    behavior,
                    is_async,
                    calls: Arc::default(),
                },
            );
            self
        }

        pub fn with_method(
            mut self,
            type_name: &str,
            method: &str,
            behavior: Behavior,
            is_async: bool,
        ) -> Self {
            self.methods.insert(
                (type_name.to_string(), method.to_string()),
                Scripted {
                    behavior,
                    is_async,
                    calls: Arc::default(),
                },
            );
            self
        }

        /// Calls made to a function or method entry point
        pub fn calls(&self, name: &str) -> usize {
            self.functions
                .get(name)
                .or_else(|| {
                    self.methods
                        .iter()
                        .find(|((_, m), _)| m == name)
                        .map(|(_, s)| s)
                })
                .map_or(0, |s| s.calls.count.load(Ordering::SeqCst))
        }

        /// Instances constructed for method calls
        pub fn constructed(&self) -> usize {
            self.constructed.load(Ordering::SeqCst)
        }
    }

    impl ModuleUnit for ScriptedUnit {
        fn function(&self, name: &str) -> Option<EntryPoint> {
            self.functions.get(name).map(Scripted::entry)
        }

        fn method(&self, type_name: &str, method: &str) -> Option<EntryPoint> {
            let scripted = self
                .methods
                .get(&(type_name.to_string(), method.to_string()))?;
            let inner = scripted.entry();
            let constructed = Arc::clone(&self.constructed);
            Some(match inner {
                EntryPoint::Blocking(f) => EntryPoint::blocking(move |payload| {
                    constructed.fetch_add(1, Ordering::SeqCst);
                    f(payload)
                }),
                EntryPoint::Async(f) => EntryPoint::future(move |payload| {
                    constructed.fetch_add(1, Ordering::SeqCst);
                    f(payload)
                }),
            })
        }
    }

    /// Loader over a fixed set of units; counts loads per unit
    #[derive(Default)]
    pub struct ScriptedLoader {
        units: HashMap<String, Arc<ScriptedUnit>>,
        loads: Mutex<HashMap<String, usize>>,
        load_delay: Option<Duration>,
    }

    impl ScriptedLoader {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_unit(mut self, name: &str, unit: ScriptedUnit) -> Self {
            self.units.insert(name.to_string(), Arc::new(unit));
            self
        }

        /// Make each load take a while (exercises concurrent first use)
        pub fn with_load_delay(mut self, delay: Duration) -> Self {
            self.load_delay = Some(delay);
            self
        }

        pub fn unit(&self, name: &str) -> Option<Arc<ScriptedUnit>> {
            self.units.get(name).cloned()
        }

        pub fn loads(&self, name: &str) -> usize {
            self.loads
                .lock()
                .map(|l| l.get(name).copied().unwrap_or(0))
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl ModuleLoader for ScriptedLoader {
        async fn load(&self, unit: &str) -> Result<Arc<dyn ModuleUnit>, ModuleFailure> {
            if let Some(delay) = self.load_delay {
                tokio::time::sleep(delay).await;
            }
            if let Ok(mut loads) = self.loads.lock() {
                *loads.entry(unit.to_string()).or_insert(0) += 1;
            }
            self.units
                .get(unit)
                .cloned()
                .map(|u| u as Arc<dyn ModuleUnit>)
                .ok_or_else(|| ModuleFailure::new(format!("unit '{}' not found", unit)))
        }
    }
}
