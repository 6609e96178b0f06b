// scanq Built-in Modules
// Code units resolved by name through `BuiltinLoader`; `descriptors()` is the registry table.

pub mod command;
pub mod diagnostics;
pub mod http_probe;
pub mod network;
mod payload;

pub use command::CommandRunner;
pub use network::{BannerGrabber, TcpProber};

use async_trait::async_trait;
use scanq_core::application::ModuleRegistry;
use scanq_core::domain::ModuleDescriptor;
use scanq_core::error::Result;
use scanq_core::port::{ModuleFailure, ModuleLoader, ModuleUnit};
use std::sync::Arc;
use tracing::debug;

/// Every built-in module
pub fn descriptors() -> Vec<ModuleDescriptor> {
    vec![
        ModuleDescriptor::function(
            "echo",
            diagnostics::UNIT,
            "echo",
            false,
            "Return the payload unchanged",
        ),
        ModuleDescriptor::function(
            "always_fails",
            diagnostics::UNIT,
            "always_fails",
            false,
            "Fail on every attempt (retry diagnostics)",
        ),
        ModuleDescriptor::function(
            "sleep",
            diagnostics::UNIT,
            "sleep",
            true,
            "Sleep for `seconds` (timeout diagnostics)",
        ),
        ModuleDescriptor::method(
            "tcp_probe",
            network::UNIT,
            "TcpProber",
            "scan",
            true,
            "TCP connect scan of `ports` on `target`",
        ),
        ModuleDescriptor::method(
            "banner_grab",
            network::UNIT,
            "BannerGrabber",
            "grab",
            false,
            "Read the service banner on `target`:`port`",
        ),
        ModuleDescriptor::function(
            "http_probe",
            http_probe::UNIT,
            "probe",
            true,
            "HTTP GET fingerprint of `url` (status, server, title)",
        ),
        ModuleDescriptor::method(
            "command",
            command::UNIT,
            "CommandRunner",
            "run",
            true,
            "Run an allow-listed external scanner",
        ),
    ]
}

/// Registry over the built-in modules
pub fn builtin_registry() -> Result<ModuleRegistry> {
    ModuleRegistry::new(descriptors())
}

/// Resolves built-in code units by name
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinLoader;

#[async_trait]
impl ModuleLoader for BuiltinLoader {
    async fn load(&self, unit: &str) -> std::result::Result<Arc<dyn ModuleUnit>, ModuleFailure> {
        debug!(unit = %unit, "Resolving built-in unit");
        let loaded: Arc<dyn ModuleUnit> = match unit {
            diagnostics::UNIT => Arc::new(diagnostics::DiagnosticsUnit),
            network::UNIT => Arc::new(network::NetworkUnit),
            http_probe::UNIT => Arc::new(http_probe::HttpUnit),
            command::UNIT => Arc::new(command::ProcessUnit),
            other => {
                return Err(ModuleFailure::new(format!(
                    "No built-in unit named '{}'",
                    other
                )))
            }
        };
        Ok(loaded)
    }
}
