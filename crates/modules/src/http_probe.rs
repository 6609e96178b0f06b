// HTTP unit: single GET fingerprint

use crate::payload::{optional_u64, required_str};
use scanq_core::domain::JobPayload;
use scanq_core::port::{EntryPoint, ModuleFailure, ModuleOutput, ModuleUnit};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub const UNIT: &str = "http";

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const MAX_REDIRECTS: usize = 5;
const MAX_BODY_BYTES: usize = 64 * 1024;

pub struct HttpUnit;

impl ModuleUnit for HttpUnit {
    fn function(&self, name: &str) -> Option<EntryPoint> {
        match name {
            "probe" => Some(EntryPoint::future(|payload| Box::pin(probe(payload)))),
            _ => None,
        }
    }

    fn method(&self, _type_name: &str, _method: &str) -> Option<EntryPoint> {
        None
    }
}

fn target_url(payload: &JobPayload) -> Result<String, ModuleFailure> {
    if let Some(url) = payload.get_str("url").filter(|s| !s.trim().is_empty()) {
        return Ok(url.to_string());
    }
    let target = required_str(payload, "target")?;
    if target.starts_with("http://") || target.starts_with("https://") {
        Ok(target.to_string())
    } else {
        Ok(format!("http://{}", target))
    }
}

fn extract_title(body: &str) -> Option<String> {
    let lower = body.to_ascii_lowercase();
    let open = lower.find("<title")?;
    let start = open + lower[open..].find('>')? + 1;
    let end = start + lower[start..].find("</title")?;
    let title = body[start..end].trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// Payload: `url` (or `target` host), `timeout_ms` (optional)
pub async fn probe(payload: JobPayload) -> ModuleOutput {
    let url = target_url(&payload)?;
    let request_timeout = optional_u64(&payload, "timeout_ms")?.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(request_timeout))
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()
        .map_err(|e| ModuleFailure::new(format!("HTTP client: {}", e)))?;

    let mut response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| ModuleFailure::new(format!("GET {} failed: {}", url, e)))?;

    let status = response.status();
    let (server, content_type) = {
        let headers = response.headers();
        let header = |name: reqwest::header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        (
            header(reqwest::header::SERVER),
            header(reqwest::header::CONTENT_TYPE),
        )
    };
    let final_url = response.url().to_string();

    let mut body = Vec::new();
    while body.len() < MAX_BODY_BYTES {
        match response.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(e) => {
                debug!(url = %url, error = %e, "Body read stopped early");
                break;
            }
        }
    }
    body.truncate(MAX_BODY_BYTES);
    let title = extract_title(&String::from_utf8_lossy(&body));

    Ok(json!({
        "url": url,
        "final_url": final_url,
        "status": status.as_u16(),
        "server": server,
        "content_type": content_type,
        "title": title,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn payload(value: serde_json::Value) -> JobPayload {
        JobPayload::from_value(value).unwrap()
    }

    #[test]
    fn test_target_becomes_http_url() {
        assert_eq!(
            target_url(&payload(json!({"target": "10.0.0.5:8080"}))).unwrap(),
            "http://10.0.0.5:8080"
        );
        assert_eq!(
            target_url(&payload(json!({"url": "https://example.test/"}))).unwrap(),
            "https://example.test/"
        );
        assert!(target_url(&payload(json!({}))).is_err());
    }

    #[test]
    fn test_extract_title() {
        assert_eq!(
            extract_title("<html><TITLE> Router Login </TITLE></html>").as_deref(),
            Some("Router Login")
        );
        assert_eq!(extract_title("<html><title></title></html>"), None);
        assert_eq!(extract_title("no markup"), None);
    }

    #[tokio::test]
    async fn test_probe_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = conn.read(&mut buf).await;
            let body = "<html><head><title>PLC Web</title></head></html>";
            let response = format!(
                "HTTP/1.1 200 OK\r\nServer: test-httpd/1.0\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            conn.write_all(response.as_bytes()).await.unwrap();
        });

        let out = probe(payload(json!({"target": addr.to_string()}))).await.unwrap();

        assert_eq!(out["status"], json!(200));
        assert_eq!(out["server"], json!("test-httpd/1.0"));
        assert_eq!(out["content_type"], json!("text/html"));
        assert_eq!(out["title"], json!("PLC Web"));
    }

    #[tokio::test]
    async fn test_probe_connection_refused_fails() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let err = probe(payload(json!({"url": format!("http://127.0.0.1:{}/", port), "timeout_ms": 1000})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed"));
    }
}
