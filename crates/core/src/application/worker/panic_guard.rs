// Panic isolation: a panicking module must not take the worker down
use std::any::Any;
use std::panic::{catch_unwind, UnwindSafe};
use tracing::error;

/// Result of a panic-guarded execution
#[derive(Debug)]
pub enum PanicGuardResult<T> {
    /// Execution completed
    Success(T),
    /// Execution panicked; carries the panic message
    Panicked(String),
}

/// Run a closure, converting a panic into `PanicGuardResult::Panicked`
pub fn execute_guarded<F, T>(f: F) -> PanicGuardResult<T>
where
    F: FnOnce() -> T + UnwindSafe,
{
    match catch_unwind(f) {
        Ok(result) => PanicGuardResult::Success(result),
        Err(payload) => {
            let panic_msg = panic_message(payload.as_ref());
            error!(panic_msg = %panic_msg, "Module call panicked");
            PanicGuardResult::Panicked(panic_msg)
        }
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_passes_through() {
        match execute_guarded(|| 42) {
            PanicGuardResult::Success(v) => assert_eq!(v, 42),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_panic_message_is_captured() {
        let result: PanicGuardResult<()> = execute_guarded(|| panic!("boom {}", 7));
        match result {
            PanicGuardResult::Panicked(msg) => assert_eq!(msg, "boom 7"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
