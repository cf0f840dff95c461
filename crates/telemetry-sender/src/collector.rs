//! Remote collector strategies

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{Map, Value};
use telemetry_core::config::CollectorConfig;
use telemetry_core::prelude::*;
use tracing::{debug, trace};

// ============================================================================
// HTTP Collector
// ============================================================================

/// Stable transport code for a reqwest failure
fn error_code(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else {
        "request"
    }
}

/// Posts events to the collector endpoint as JSON
pub struct HttpCollector {
    client: Client,
    config: CollectorConfig,
    url: String,
}

impl HttpCollector {
    pub fn new(config: CollectorConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                TelemetryError::transport_with_source("client", "Failed to create HTTP client", e)
            })?;

        let url = config.url();
        Ok(Self {
            client,
            config,
            url,
        })
    }

    fn build_request(&self, request: &CollectorRequest) -> reqwest::RequestBuilder {
        let mut req = self.client.post(&self.url).json(&request.body);

        if let Some(ref token) = self.config.api_token {
            req = req.header(self.config.token_header.as_str(), token.as_str());
        }
        if let Some(ref domain) = self.config.domain {
            req = req.header(self.config.domain_header.as_str(), domain.as_str());
        }
        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        req
    }
}

#[async_trait]
impl Collector for HttpCollector {
    async fn send(&self, request: CollectorRequest) -> Result<Value> {
        trace!(url = %self.url, "Posting event");

        let resp = self.build_request(&request).send().await.map_err(|e| {
            TelemetryError::transport_with_source(error_code(&e), "Collector request failed", e)
        })?;

        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|e| {
            TelemetryError::transport_with_source(error_code(&e), "Failed to read response", e)
        })?;

        if !status.is_success() {
            return Err(TelemetryError::transport(
                format!("http_{}", status.as_u16()),
                String::from_utf8_lossy(&bytes).into_owned(),
            ));
        }

        debug!(status = status.as_u16(), bytes = bytes.len(), "Collector responded");

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Object(Map::new()));
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn name(&self) -> &'static str {
        "http_collector"
    }
}

// ============================================================================
// Recording Collector (for testing)
// ============================================================================

/// Canned behavior of a [`RecordingCollector`]
#[derive(Debug, Clone)]
pub enum Reply {
    /// Respond with this body
    Body(Value),
    /// Fail with a transport error carrying this code
    Transport(String),
    /// Fail with an undecodable response
    Malformed,
    /// Panic inside the send
    Panic,
}

/// Collector that records requests and answers with a canned reply
pub struct RecordingCollector {
    reply: Mutex<Reply>,
    requests: Mutex<Vec<CollectorRequest>>,
}

impl RecordingCollector {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply: Mutex::new(reply),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_reply(&self, reply: Reply) {
        *self.reply.lock() = reply;
    }

    pub fn requests(&self) -> Vec<CollectorRequest> {
        self.requests.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Default for RecordingCollector {
    fn default() -> Self {
        Self::new(Reply::Body(serde_json::json!({"status": "ok"})))
    }
}

#[async_trait]
impl Collector for RecordingCollector {
    async fn send(&self, request: CollectorRequest) -> Result<Value> {
        self.requests.lock().push(request);

        let reply = self.reply.lock().clone();
        match reply {
            Reply::Body(body) => Ok(body),
            Reply::Transport(code) => Err(TelemetryError::transport(code, "Injected failure")),
            Reply::Malformed => Ok(serde_json::from_str::<Value>("{not json")?),
            Reply::Panic => panic!("collector exploded"),
        }
    }

    fn name(&self) -> &'static str {
        "recording_collector"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve one HTTP exchange; yields the raw request text
    async fn stub_server(status: u16, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];

            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);

                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if buf.len() >= split + 4 + length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {} STUB\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&buf).to_string()
        });

        (format!("http://{}", addr), handle)
    }

    fn config(base_url: String) -> CollectorConfig {
        CollectorConfig {
            base_url,
            api_token: Some("secret".to_string()),
            domain: Some("example.com".to_string()),
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn request() -> CollectorRequest {
        CollectorRequest {
            body: json!({"params": {"action": "promo"}}),
            headers: vec![("X-Correlation-ID".to_string(), "corr-1".to_string())],
        }
    }

    #[tokio::test]
    async fn test_posts_body_and_headers() {
        let (base_url, server) = stub_server(200, r#"{"status":"ok"}"#).await;
        let collector = HttpCollector::new(config(base_url)).unwrap();

        let body = collector.send(request()).await.unwrap();
        assert_eq!(body, json!({"status": "ok"}));

        let raw = server.await.unwrap().to_lowercase();
        assert!(raw.starts_with("post /v3/wordpress/plugin/trigger-event "));
        assert!(raw.contains("x-api-token: secret"));
        assert!(raw.contains("x-site-domain: example.com"));
        assert!(raw.contains("x-correlation-id: corr-1"));
        assert!(raw.contains(r#"{"params":{"action":"promo"}}"#));
    }

    #[tokio::test]
    async fn test_non_success_status_is_transport_error() {
        let (base_url, _server) = stub_server(503, r#"{"error":"busy"}"#).await;
        let collector = HttpCollector::new(config(base_url)).unwrap();

        let err = collector.send(request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.code(), Some("http_503"));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_unexpected() {
        let (base_url, _server) = stub_server(200, "<html>").await;
        let collector = HttpCollector::new(config(base_url)).unwrap();

        let err = collector.send(request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
    }

    #[tokio::test]
    async fn test_empty_body_is_empty_object() {
        let (base_url, _server) = stub_server(200, "").await;
        let collector = HttpCollector::new(config(base_url)).unwrap();

        assert_eq!(collector.send(request()).await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let collector = HttpCollector::new(config(format!("http://{}", addr))).unwrap();
        let err = collector.send(request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.code(), Some("connect"));
    }
}
