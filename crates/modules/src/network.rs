// Network unit: TCP connect scan and banner grabbing

use crate::payload::{optional_u64, required_str};
use futures::stream::{self, StreamExt};
use scanq_core::domain::JobPayload;
use scanq_core::port::{EntryPoint, ModuleFailure, ModuleOutput, ModuleUnit};
use serde_json::json;
use std::io::Read;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

pub const UNIT: &str = "network";

/// Ports probed when the payload names none
pub const DEFAULT_PORTS: &[u16] = &[21, 22, 23, 25, 53, 80, 102, 443, 502, 3389, 8080, 20000, 44818];

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 2_000;
const MAX_CONCURRENT_CONNECTS: usize = 64;
const MAX_BANNER_BYTES: usize = 1024;

pub struct NetworkUnit;

impl ModuleUnit for NetworkUnit {
    fn function(&self, _name: &str) -> Option<EntryPoint> {
        None
    }

    fn method(&self, type_name: &str, method: &str) -> Option<EntryPoint> {
        match (type_name, method) {
            ("TcpProber", "scan") => Some(EntryPoint::future(|payload| {
                Box::pin(async move { TcpProber::new().scan(payload).await })
            })),
            ("BannerGrabber", "grab") => {
                Some(EntryPoint::blocking(|payload| BannerGrabber::new().grab(payload)))
            }
            _ => None,
        }
    }
}

fn ports_from(payload: &JobPayload) -> Result<Vec<u16>, ModuleFailure> {
    let Some(value) = payload.get("ports") else {
        return Ok(DEFAULT_PORTS.to_vec());
    };
    let items = value
        .as_array()
        .ok_or_else(|| ModuleFailure::new("'ports' must be an array of port numbers"))?;
    items
        .iter()
        .map(|v| {
            v.as_u64()
                .and_then(|p| u16::try_from(p).ok())
                .filter(|p| *p != 0)
                .ok_or_else(|| ModuleFailure::new(format!("Invalid port: {}", v)))
        })
        .collect()
}

fn resolve(target: &str, port: u16) -> Result<SocketAddr, ModuleFailure> {
    (target, port)
        .to_socket_addrs()
        .map_err(|e| ModuleFailure::new(format!("Cannot resolve {}: {}", target, e)))?
        .next()
        .ok_or_else(|| ModuleFailure::new(format!("No address for {}", target)))
}

/// Concurrent TCP connect scanner
pub struct TcpProber {
    connect_timeout: Duration,
}

impl Default for TcpProber {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpProber {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }

    /// Payload: `target` (host), `ports` (optional), `connect_timeout_ms` (optional)
    pub async fn scan(&self, payload: JobPayload) -> ModuleOutput {
        let target = required_str(&payload, "target")?.to_string();
        let ports = ports_from(&payload)?;
        let connect_timeout = optional_u64(&payload, "connect_timeout_ms")?
            .map(Duration::from_millis)
            .unwrap_or(self.connect_timeout);

        let host = target.clone();
        let ip = tokio::task::spawn_blocking(move || resolve(&host, 0))
            .await
            .map_err(|e| ModuleFailure::new(e.to_string()))??
            .ip();

        let mut open: Vec<u16> = stream::iter(ports.iter().copied())
            .map(|port| async move {
                let addr = SocketAddr::new(ip, port);
                let connected = matches!(
                    tokio::time::timeout(connect_timeout, tokio::net::TcpStream::connect(addr)).await,
                    Ok(Ok(_))
                );
                (port, connected)
            })
            .buffer_unordered(MAX_CONCURRENT_CONNECTS)
            .filter_map(|(port, connected)| async move { connected.then_some(port) })
            .collect()
            .await;
        open.sort_unstable();

        debug!(target = %target, scanned = ports.len(), open = open.len(), "TCP scan finished");
        Ok(json!({
            "target": target,
            "address": ip.to_string(),
            "scanned": ports.len(),
            "open_ports": open,
        }))
    }
}

/// Reads whatever a service sends right after connect
pub struct BannerGrabber {
    read_timeout: Duration,
}

impl Default for BannerGrabber {
    fn default() -> Self {
        Self::new()
    }
}

impl BannerGrabber {
    pub fn new() -> Self {
        Self {
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        }
    }

    /// Payload: `target`, `port`, `read_timeout_ms` (optional)
    pub fn grab(&self, payload: JobPayload) -> ModuleOutput {
        let target = required_str(&payload, "target")?;
        let port = optional_u64(&payload, "port")?
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p != 0)
            .ok_or_else(|| ModuleFailure::new("Missing or invalid 'port' in payload"))?;
        let read_timeout = optional_u64(&payload, "read_timeout_ms")?
            .map(Duration::from_millis)
            .unwrap_or(self.read_timeout);

        let addr = resolve(target, port)?;
        let mut stream = TcpStream::connect_timeout(&addr, read_timeout)
            .map_err(|e| ModuleFailure::new(format!("Connect to {} failed: {}", addr, e)))?;
        stream
            .set_read_timeout(Some(read_timeout))
            .map_err(|e| ModuleFailure::new(e.to_string()))?;

        let mut buf = vec![0u8; MAX_BANNER_BYTES];
        let read = match stream.read(&mut buf) {
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                0
            }
            Err(e) => return Err(ModuleFailure::new(format!("Read from {} failed: {}", addr, e))),
        };
        let text = String::from_utf8_lossy(&buf[..read]).trim().to_string();
        let banner = (!text.is_empty()).then_some(text);

        Ok(json!({
            "target": target,
            "port": port,
            "banner": banner,
        }))
    }
}
