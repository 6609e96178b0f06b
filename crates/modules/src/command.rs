// Process unit: runs allow-listed external scanners
// The child is killed when the call is dropped (timeout or shutdown).

use crate::payload::{required_str, string_list};
use scanq_core::domain::JobPayload;
use scanq_core::port::{EntryPoint, ModuleFailure, ModuleOutput, ModuleUnit};
use serde_json::json;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

pub const UNIT: &str = "process";

/// Comma-separated program names that may be run
pub const ALLOWED_COMMANDS_ENV: &str = "SCANQ_ALLOWED_COMMANDS";

const DEFAULT_PROGRAMS: &[&str] = &["nmap", "masscan", "nikto", "whatweb", "sqlmap"];
const DEFAULT_ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "USER", "LANG"];
const MAX_OUTPUT_CHARS: usize = 256 * 1024;

pub struct ProcessUnit;

impl ModuleUnit for ProcessUnit {
    fn function(&self, _name: &str) -> Option<EntryPoint> {
        None
    }

    fn method(&self, type_name: &str, method: &str) -> Option<EntryPoint> {
        match (type_name, method) {
            ("CommandRunner", "run") => Some(EntryPoint::future(|payload| {
                Box::pin(async move { CommandRunner::new().run(payload).await })
            })),
            _ => None,
        }
    }
}

/// Spawns child processes with an allow-listed program and environment
pub struct CommandRunner {
    programs: Vec<String>,
    env_allowlist: Vec<String>,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner {
    /// Programs from `SCANQ_ALLOWED_COMMANDS`, or the default scanner set
    pub fn new() -> Self {
        let programs = std::env::var(ALLOWED_COMMANDS_ENV)
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| DEFAULT_PROGRAMS.iter().map(|s| s.to_string()).collect());
        Self {
            programs,
            env_allowlist: DEFAULT_ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_allowlist(programs: Vec<String>, env_allowlist: Vec<String>) -> Self {
        Self {
            programs,
            env_allowlist,
        }
    }

    fn check_program<'a>(&self, program: &'a str) -> Result<&'a str, ModuleFailure> {
        if program.contains('/') || program.contains('\\') {
            return Err(ModuleFailure::new(format!(
                "Program must be a bare name, got '{}'",
                program
            )));
        }
        if !self.programs.iter().any(|p| p == program) {
            return Err(ModuleFailure::new(format!(
                "Program '{}' is not allowed (allowed: {})",
                program,
                self.programs.join(", ")
            )));
        }
        Ok(program)
    }

    /// Inherited and payload variables, restricted to the allowlist
    fn filter_env(&self, requested: &HashMap<String, String>) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = self
            .env_allowlist
            .iter()
            .filter_map(|k| std::env::var(k).ok().map(|v| (k.clone(), v)))
            .collect();
        env.extend(
            requested
                .iter()
                .filter(|(k, _)| self.env_allowlist.contains(k))
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        env
    }

    /// Payload: `program`, `args` (optional), `env` (optional), `working_dir` (optional)
    pub async fn run(&self, payload: JobPayload) -> ModuleOutput {
        let program = self.check_program(required_str(&payload, "program")?)?;
        let args = string_list(&payload, "args");
        let requested: HashMap<String, String> = payload
            .get("env")
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        let working_dir = payload.get_str("working_dir").unwrap_or(".");

        info!(program = %program, args = ?args, working_dir = %working_dir, "Starting external command");

        let output = Command::new(program)
            .args(&args)
            .env_clear()
            .envs(self.filter_env(&requested))
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ModuleFailure::new(format!("Failed to start '{}': {}", program, e)))?
            .wait_with_output()
            .await
            .map_err(|e| ModuleFailure::new(format!("Failed to wait for '{}': {}", program, e)))?;

        let stdout = truncated(&output.stdout);
        let stderr = truncated(&output.stderr);
        let exit_code = output.status.code();

        if !output.status.success() {
            warn!(program = %program, exit_code = ?exit_code, "External command failed");
            return Err(ModuleFailure::new(format!(
                "'{}' exited with {}: {}",
                program,
                exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                stderr.trim()
            )));
        }

        info!(program = %program, "External command completed");
        Ok(json!({
            "program": program,
            "exit_code": exit_code,
            "stdout": stdout,
            "stderr": stderr,
        }))
    }
}

fn truncated(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    match text.char_indices().nth(MAX_OUTPUT_CHARS) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.into_owned(),
    }
}
