//! Automation server status client and launcher.

use crate::config::ServerConfig;
use crate::errors::GuardError;
use crate::observability::Logger;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::error::Error as _;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info};

/// Outcome of one status poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ServerStatus {
    Ready {
        build: Option<String>,
        elapsed_ms: u64,
    },
    /// Answered ready, but slower than the configured threshold
    Slow { elapsed_ms: u64 },
    /// Answered, but reports itself not ready
    NotReady { message: String },
    Refused,
    TimedOut,
    HttpError { code: u16 },
    Unreachable { message: String },
}

impl ServerStatus {
    /// True for any response that means the server is up and serving.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. } | Self::Slow { .. })
    }
}

fn is_connection_refused(error: &reqwest::Error) -> bool {
    let mut source = error.source();
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        if err.to_string().to_lowercase().contains("connection refused") {
            return true;
        }
        source = err.source();
    }
    false
}

pub struct ServerClient {
    http: Client,
    config: ServerConfig,
}

impl ServerClient {
    pub fn new(config: ServerConfig) -> Result<Self, GuardError> {
        let http = Client::builder()
            .timeout(config.status_timeout())
            .connect_timeout(config.status_timeout())
            .build()
            .map_err(|e| GuardError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn status_url(&self) -> String {
        format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.status_path
        )
    }

    /// Poll the status endpoint once.
    pub async fn status(&self) -> ServerStatus {
        let started = Instant::now();
        let response = match self.http.get(self.status_url()).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return ServerStatus::TimedOut,
            Err(e) if is_connection_refused(&e) => return ServerStatus::Refused,
            Err(e) => {
                return ServerStatus::Unreachable {
                    message: e.to_string(),
                }
            }
        };

        let code = response.status();
        if !code.is_success() {
            return ServerStatus::HttpError {
                code: code.as_u16(),
            };
        }

        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => return ServerStatus::TimedOut,
            Err(_) => serde_json::Value::Null,
        };
        let elapsed = started.elapsed();
        let value = &body["value"];

        if value["ready"].as_bool() == Some(false) {
            return ServerStatus::NotReady {
                message: value["message"].as_str().unwrap_or("not ready").to_string(),
            };
        }

        let elapsed_ms = elapsed.as_millis() as u64;
        if elapsed > self.config.slow_threshold() {
            return ServerStatus::Slow { elapsed_ms };
        }
        ServerStatus::Ready {
            build: value["build"]["version"].as_str().map(str::to_string),
            elapsed_ms,
        }
    }

    /// Poll until ready, at most `attempts` times, sleeping `interval`
    /// between polls.
    pub async fn wait_until_ready(&self, attempts: u32, interval: Duration) -> bool {
        for attempt in 1..=attempts.max(1) {
            let status = self.status().await;
            if status.is_ready() {
                debug!(attempt, "Automation server ready");
                return true;
            }
            debug!(attempt, status = ?status, "Automation server not ready yet");
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        false
    }
}

/// Starts the automation server process.
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    async fn launch(&self) -> Result<(), GuardError>;
}

/// Spawns the configured command detached from this process's stdio.
pub struct ProcessLauncher {
    command: String,
    args: Vec<String>,
    logger: Arc<dyn Logger>,
}

impl ProcessLauncher {
    /// `None` when no launch command is configured.
    pub fn from_config(config: &ServerConfig, logger: Arc<dyn Logger>) -> Option<Self> {
        let command = config.launch_command.clone()?;
        Some(Self {
            command,
            args: config.launch_args.clone(),
            logger,
        })
    }
}

#[async_trait]
impl ServerLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<(), GuardError> {
        let child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| GuardError::Server(format!("failed to start {}: {}", self.command, e)))?;
        info!(command = %self.command, pid = ?child.id(), "Automation server launched");
        self.logger
            .info(&format!("Started automation server: {}", self.command));
        Ok(())
    }
}
