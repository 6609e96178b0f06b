// Diagnostics unit: echo, always_fails, sleep

use crate::payload::optional_f64;
use scanq_core::domain::JobPayload;
use scanq_core::port::{EntryPoint, ModuleFailure, ModuleOutput, ModuleUnit};
use serde_json::json;
use std::time::Duration;

pub const UNIT: &str = "diagnostics";

/// Default for `sleep` when the payload carries no `seconds`
const DEFAULT_SLEEP_SECS: f64 = 1.0;

pub struct DiagnosticsUnit;

impl ModuleUnit for DiagnosticsUnit {
    fn function(&self, name: &str) -> Option<EntryPoint> {
        match name {
            "echo" => Some(EntryPoint::blocking(echo)),
            "always_fails" => Some(EntryPoint::blocking(always_fails)),
            "sleep" => Some(EntryPoint::future(|payload| Box::pin(sleep(payload)))),
            _ => None,
        }
    }

    fn method(&self, _type_name: &str, _method: &str) -> Option<EntryPoint> {
        None
    }
}

pub fn echo(payload: JobPayload) -> ModuleOutput {
    Ok(json!({ "echo": payload }))
}

pub fn always_fails(_payload: JobPayload) -> ModuleOutput {
    Err(ModuleFailure::new("Intentional failure"))
}

pub async fn sleep(payload: JobPayload) -> ModuleOutput {
    let seconds = optional_f64(&payload, "seconds")?.unwrap_or(DEFAULT_SLEEP_SECS);
    let duration = Duration::try_from_secs_f64(seconds)
        .map_err(|e| ModuleFailure::new(format!("Invalid 'seconds': {}", e)))?;
    tokio::time::sleep(duration).await;
    Ok(json!({ "slept_seconds": seconds }))
}
