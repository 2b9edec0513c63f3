//! Mock automation server for tests
//!
//! Provides a [`MockStatusServer`] that speaks just enough of the WebDriver
//! wire protocol for the status client and the session factory: the status
//! endpoint, session creation and deletion, the timeouts ping, and the
//! current-location endpoint.
//!
//! # Example
//! ```ignore
//! let server = MockStatusServer::builder()
//!     .with_latency(Duration::from_millis(50))
//!     .build()
//!     .await?;
//! let url = server.url(); // e.g. "http://127.0.0.1:12345"
//! // ... point a ServerClient at `url` ...
//! server.stop().await;
//! ```

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Build version reported by the status endpoint.
pub const MOCK_BUILD_VERSION: &str = "2.11.0";

/// Location every new session starts at.
pub const MOCK_HOME_LOCATION: &str = "app://home";

const MAX_REQUEST_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct MockConfig {
    latency: Duration,
    status_code: u16,
    ready: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            status_code: 200,
            ready: true,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    /// session id → current location
    sessions: HashMap<String, String>,
    created: usize,
}

pub struct MockStatusServer {
    url: String,
    state: Arc<Mutex<MockState>>,
    shutdown_tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockStatusServer {
    pub fn builder() -> MockStatusServerBuilder {
        MockStatusServerBuilder::default()
    }

    /// Start a ready server on an OS-assigned port.
    pub async fn start() -> std::io::Result<Self> {
        Self::builder().build().await
    }

    /// Start a ready server on a specific port.
    pub async fn start_on_port(port: u16) -> std::io::Result<Self> {
        Self::builder().on_port(port).build().await
    }

    async fn spawn(config: MockConfig, port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let url = format!("http://{}", listener.local_addr()?);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(Mutex::new(MockState::default()));
        let handle = tokio::spawn(accept_loop(
            listener,
            Arc::new(config),
            state.clone(),
            shutdown_rx,
        ));

        Ok(Self {
            url,
            state,
            shutdown_tx,
            handle,
        })
    }

    /// The base URL, e.g. `"http://127.0.0.1:54321"`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Forget every session, as a server restart would.
    pub fn invalidate_sessions(&self) {
        self.state.lock().sessions.clear();
    }

    pub fn sessions_created(&self) -> usize {
        self.state.lock().created
    }

    pub fn active_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}

#[derive(Default)]
pub struct MockStatusServerBuilder {
    config: MockConfig,
    port: u16,
}

impl MockStatusServerBuilder {
    /// Delay applied before every status response.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.config.latency = latency;
        self
    }

    /// HTTP code returned by the status endpoint.
    pub fn with_status_code(mut self, code: u16) -> Self {
        self.config.status_code = code;
        self
    }

    /// Status answers 200 with `ready: false`.
    pub fn not_ready(mut self) -> Self {
        self.config.ready = false;
        self
    }

    pub fn on_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub async fn build(self) -> std::io::Result<MockStatusServer> {
        MockStatusServer::spawn(self.config, self.port).await
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<MockConfig>,
    state: Arc<Mutex<MockState>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, _addr)) => {
                        let config = Arc::clone(&config);
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, config, state).await {
                                tracing::debug!("mock server connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::debug!("mock server accept error: {}", e);
                    }
                }
            }
        }
    }
}

struct Request {
    method: String,
    path: String,
    body: Value,
}

/// Read one request: headers, then exactly `Content-Length` body bytes.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<Option<Request>> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 || buf.len() > MAX_REQUEST_BYTES {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0)
        .min(MAX_REQUEST_BYTES);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let body_end = buf.len().min(header_end + content_length);
    let body = serde_json::from_slice(&buf[header_end..body_end]).unwrap_or(Value::Null);

    Ok(Some(Request { method, path, body }))
}

fn invalid_session(id: &str) -> (u16, Value) {
    (
        404,
        json!({ "value": {
            "error": "invalid session id",
            "message": format!("A session is either terminated or not started: {}", id),
        }}),
    )
}

async fn route(request: &Request, config: &MockConfig, state: &Mutex<MockState>) -> (u16, Value) {
    let segments: Vec<&str> = request
        .path
        .split('?')
        .next()
        .unwrap_or_default()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["status"]) => {
            if !config.latency.is_zero() {
                tokio::time::sleep(config.latency).await;
            }
            if config.status_code != 200 {
                return (
                    config.status_code,
                    json!({ "value": { "message": "status unavailable" } }),
                );
            }
            if !config.ready {
                return (
                    200,
                    json!({ "value": { "ready": false, "message": "server is starting" } }),
                );
            }
            (
                200,
                json!({ "value": {
                    "ready": true,
                    "message": "The server is ready to accept new connections",
                    "build": { "version": MOCK_BUILD_VERSION },
                }}),
            )
        }
        ("POST", ["session"]) => {
            let mut state = state.lock();
            state.created += 1;
            let id = format!("mock-session-{}", state.created);
            state
                .sessions
                .insert(id.clone(), MOCK_HOME_LOCATION.to_string());
            (200, json!({ "value": { "sessionId": id, "capabilities": {} } }))
        }
        ("DELETE", ["session", id]) => match state.lock().sessions.remove(*id) {
            Some(_) => (200, json!({ "value": null })),
            None => invalid_session(id),
        },
        ("GET", ["session", id, "timeouts"]) => {
            if state.lock().sessions.contains_key(*id) {
                (
                    200,
                    json!({ "value": { "implicit": 0, "pageLoad": 300000, "script": 30000 } }),
                )
            } else {
                invalid_session(id)
            }
        }
        ("GET", ["session", id, "url"]) => match state.lock().sessions.get(*id) {
            Some(location) => (200, json!({ "value": location })),
            None => invalid_session(id),
        },
        ("POST", ["session", id, "url"]) => {
            let mut state = state.lock();
            match state.sessions.get_mut(*id) {
                Some(location) => {
                    if let Some(url) = request.body["url"].as_str() {
                        *location = url.to_string();
                    }
                    (200, json!({ "value": null }))
                }
                None => invalid_session(id),
            }
        }
        _ => (
            404,
            json!({ "value": { "error": "unknown command", "message": request.path } }),
        ),
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    config: Arc<MockConfig>,
    state: Arc<Mutex<MockState>>,
) -> std::io::Result<()> {
    let Some(request) = read_request(&mut stream).await? else {
        return Ok(());
    };
    let (status, body) = route(&request, &config, &state).await;
    write_http_response(&mut stream, status, &body.to_string()).await
}

async fn write_http_response(stream: &mut TcpStream, status: u16, body: &str) -> std::io::Result<()> {
    let status_text = match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Error",
    };

    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text,
        body.len(),
        body,
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}
