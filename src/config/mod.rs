//! Configuration Management
//!
//! Loads the subsystem configuration from TOML files.
//! Configuration includes:
//! - Device bridge settings (tool location, target device, candidate ports)
//! - Automation server settings (status endpoint, launch command)
//! - Session monitor settings (check interval, reconnect budget)
//! - Retry defaults and diagnostic thresholds

use crate::errors::GuardError;
use crate::strategy::RetryConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Bounds for a single bridge tool invocation.
const MIN_COMMAND_TIMEOUT_SECS: u64 = 5;
const MAX_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Bounds for one status endpoint poll.
const MIN_STATUS_TIMEOUT_SECS: u64 = 3;
const MAX_STATUS_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Executable name or absolute path of the device bridge tool
    #[serde(default = "default_executable")]
    pub executable: String,
    /// Extra SDK roots searched before the conventional install locations
    #[serde(default)]
    pub sdk_roots: Vec<PathBuf>,
    /// Loopback host the emulators bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Device the automation run targets, e.g. "127.0.0.1:62001"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_address: Option<String>,
    /// Priority-ordered loopback ports of common emulators
    #[serde(default = "default_candidate_ports")]
    pub candidate_ports: Vec<u16>,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Pause after kill-server/start-server before the daemon is usable
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_zombie_attempts")]
    pub zombie_cleanup_attempts: u32,
    #[serde(default = "default_zombie_retry_delay")]
    pub zombie_retry_delay_ms: u64,
    #[serde(default = "default_offline_fix_attempts")]
    pub offline_fix_cleanup_attempts: u32,
}

impl BridgeConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(
            self.command_timeout_secs
                .clamp(MIN_COMMAND_TIMEOUT_SECS, MAX_COMMAND_TIMEOUT_SECS),
        )
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn zombie_retry_delay(&self) -> Duration {
        Duration::from_millis(self.zombie_retry_delay_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            sdk_roots: Vec::new(),
            host: default_host(),
            target_address: None,
            candidate_ports: default_candidate_ports(),
            command_timeout_secs: default_command_timeout(),
            settle_delay_ms: default_settle_delay(),
            zombie_cleanup_attempts: default_zombie_attempts(),
            zombie_retry_delay_ms: default_zombie_retry_delay(),
            offline_fix_cleanup_attempts: default_offline_fix_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_status_path")]
    pub status_path: String,
    #[serde(default = "default_status_timeout")]
    pub status_timeout_secs: u64,
    /// Responses slower than this are reported as a warning
    #[serde(default = "default_slow_threshold")]
    pub slow_threshold_ms: u64,
    /// Command used to start the automation server, e.g. "appium"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_command: Option<String>,
    #[serde(default)]
    pub launch_args: Vec<String>,
    #[serde(default = "default_ready_attempts")]
    pub ready_poll_attempts: u32,
    #[serde(default = "default_ready_interval")]
    pub ready_poll_interval_ms: u64,
    /// Capabilities sent when creating a session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<serde_json::Value>,
}

impl ServerConfig {
    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(
            self.status_timeout_secs
                .clamp(MIN_STATUS_TIMEOUT_SECS, MAX_STATUS_TIMEOUT_SECS),
        )
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }

    /// Host and port of the base URL, used for the raw reachability probe.
    pub fn endpoint(&self) -> Option<(String, u16)> {
        let url = reqwest::Url::parse(&self.base_url).ok()?;
        let host = url.host_str()?.to_string();
        let port = url.port_or_known_default()?;
        Some((host, port))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            status_path: default_status_path(),
            status_timeout_secs: default_status_timeout(),
            slow_threshold_ms: default_slow_threshold(),
            launch_command: None,
            launch_args: Vec::new(),
            ready_poll_attempts: default_ready_attempts(),
            ready_poll_interval_ms: default_ready_interval(),
            capabilities: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_max_reconnect")]
    pub max_reconnect_attempts: u32,
    /// Upper bound for a single session-factory call
    #[serde(default = "default_reconnect_timeout")]
    pub reconnect_timeout_secs: u64,
    /// Cap of the exponential reconnect backoff
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,
    #[serde(default = "default_join_timeout")]
    pub shutdown_join_timeout_secs: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,
}

impl MonitorConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.reconnect_timeout_secs)
    }

    pub fn shutdown_join_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_join_timeout_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_interval(),
            max_reconnect_attempts: default_max_reconnect(),
            reconnect_timeout_secs: default_reconnect_timeout(),
            backoff_cap_secs: default_backoff_cap(),
            shutdown_join_timeout_secs: default_join_timeout(),
            ping_timeout_secs: default_ping_timeout(),
        }
    }
}

/// Warning and critical percentages for one host resource.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBand {
    pub warning: f32,
    pub critical: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Timeout of each raw TCP reachability probe
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_cpu_band")]
    pub cpu: ThresholdBand,
    #[serde(default = "default_memory_band")]
    pub memory: ThresholdBand,
    #[serde(default = "default_disk_band")]
    pub disk: ThresholdBand,
}

impl DiagnosticsConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout(),
            cpu: default_cpu_band(),
            memory: default_memory_band(),
            disk: default_disk_band(),
        }
    }
}

fn default_executable() -> String {
    "adb".to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_candidate_ports() -> Vec<u16> {
    crate::bridge::DEFAULT_CANDIDATE_PORTS.to_vec()
}
fn default_command_timeout() -> u64 {
    10
}
fn default_settle_delay() -> u64 {
    2000
}
fn default_zombie_attempts() -> u32 {
    3
}
fn default_zombie_retry_delay() -> u64 {
    1000
}
fn default_offline_fix_attempts() -> u32 {
    2
}
fn default_base_url() -> String {
    "http://127.0.0.1:4723".to_string()
}
fn default_status_path() -> String {
    "/status".to_string()
}
fn default_status_timeout() -> u64 {
    4
}
fn default_slow_threshold() -> u64 {
    2000
}
fn default_ready_attempts() -> u32 {
    30
}
fn default_ready_interval() -> u64 {
    1000
}
fn default_health_interval() -> u64 {
    30
}
fn default_max_reconnect() -> u32 {
    5
}
fn default_reconnect_timeout() -> u64 {
    60
}
fn default_backoff_cap() -> u64 {
    10
}
fn default_join_timeout() -> u64 {
    5
}
fn default_ping_timeout() -> u64 {
    5
}
fn default_cpu_band() -> ThresholdBand {
    ThresholdBand {
        warning: 80.0,
        critical: 95.0,
    }
}
fn default_memory_band() -> ThresholdBand {
    ThresholdBand {
        warning: 85.0,
        critical: 95.0,
    }
}
fn default_disk_band() -> ThresholdBand {
    ThresholdBand {
        warning: 90.0,
        critical: 98.0,
    }
}
fn default_probe_timeout() -> u64 {
    2000
}

impl Config {
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config: Config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config from {}", p))?;
                toml::from_str(&content).context("Failed to parse config")?
            }
            None => {
                let mut default_paths = vec![PathBuf::from("sessionguard.toml")];
                if let Some(home) = dirs::home_dir() {
                    default_paths.push(home.join(".config/sessionguard/config.toml"));
                }

                let mut loaded = None;
                for p in &default_paths {
                    if let Ok(content) = std::fs::read_to_string(p) {
                        loaded = Some(toml::from_str(&content).with_context(|| {
                            format!("Failed to parse config {}", p.display())
                        })?);
                        break;
                    }
                }
                loaded.unwrap_or_else(|| {
                    debug!("No config file found, using defaults");
                    Self::default()
                })
            }
        };

        // Override with environment variables
        if let Ok(url) = std::env::var("SESSIONGUARD_SERVER_URL") {
            config.server.base_url = url;
        }
        if let Ok(device) = std::env::var("SESSIONGUARD_DEVICE") {
            config.bridge.target_address = Some(device);
        }
        if let Ok(adb) = std::env::var("SESSIONGUARD_ADB") {
            config.bridge.executable = adb;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a loop spin or never run.
    pub fn validate(&self) -> std::result::Result<(), GuardError> {
        if self.monitor.health_check_interval_secs == 0 {
            return Err(GuardError::Config(
                "monitor.health_check_interval_secs must be greater than 0".into(),
            ));
        }
        if self.monitor.max_reconnect_attempts == 0 {
            return Err(GuardError::Config(
                "monitor.max_reconnect_attempts must be greater than 0".into(),
            ));
        }
        for (name, value) in [
            ("monitor.ping_timeout_secs", self.monitor.ping_timeout_secs),
            ("monitor.reconnect_timeout_secs", self.monitor.reconnect_timeout_secs),
            ("monitor.shutdown_join_timeout_secs", self.monitor.shutdown_join_timeout_secs),
            ("diagnostics.probe_timeout_ms", self.diagnostics.probe_timeout_ms),
        ] {
            if value == 0 {
                return Err(GuardError::Config(format!("{} must be greater than 0", name)));
            }
        }
        if self.retry.max_retries == 0 {
            return Err(GuardError::Config(
                "retry.max_retries must be greater than 0".into(),
            ));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(GuardError::Config(
                "retry.backoff_factor must be at least 1.0".into(),
            ));
        }
        if self.bridge.zombie_cleanup_attempts == 0 {
            return Err(GuardError::Config(
                "bridge.zombie_cleanup_attempts must be greater than 0".into(),
            ));
        }
        for (name, band) in [
            ("cpu", self.diagnostics.cpu),
            ("memory", self.diagnostics.memory),
            ("disk", self.diagnostics.disk),
        ] {
            if band.warning > band.critical {
                return Err(GuardError::Config(format!(
                    "diagnostics.{} warning threshold ({}) exceeds critical ({})",
                    name, band.warning, band.critical
                )));
            }
        }
        reqwest::Url::parse(&self.server.base_url).map_err(|e| {
            GuardError::Config(format!(
                "server.base_url '{}' is not a valid URL: {}",
                self.server.base_url, e
            ))
        })?;
        Ok(())
    }
}
