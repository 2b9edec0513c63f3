//! Device bridge controller
//!
//! Wraps the device-bridge command-line tool: device listing, connect and
//! disconnect, daemon restarts, candidate address discovery and the two
//! multi-step repair procedures (zombie cleanup, offline-device repair).
//!
//! Every invocation goes through a [`CommandRunner`] with the configured
//! per-call timeout, so nothing here can block indefinitely.

pub mod locate;
pub mod parse;
pub mod runner;

pub use locate::locate_executable;
pub use parse::{DeviceEntry, DeviceState};
pub use runner::{CommandOutput, CommandRunner, ProcessRunner};

use crate::config::BridgeConfig;
use crate::errors::GuardError;
use crate::observability::telemetry::{sanitize_for_log, track_operation};
use crate::observability::Logger;
use crate::probe::PortProbe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Loopback ports used by common device emulators, highest priority first.
pub const DEFAULT_CANDIDATE_PORTS: &[u16] = &[
    16384, // MuMu 12
    16416, // MuMu 12, second instance
    7555,  // MuMu 6
    62001, // Nox
    62025, // Nox, second instance
    5555,  // BlueStacks / LDPlayer / generic tcpip
    5557,
    21503, // MEmu
];

pub struct BridgeController {
    config: BridgeConfig,
    executable: Option<PathBuf>,
    runner: Arc<dyn CommandRunner>,
    logger: Arc<dyn Logger>,
}

impl BridgeController {
    /// Build a controller, locating the tool on disk.
    pub fn new(config: BridgeConfig, runner: Arc<dyn CommandRunner>, logger: Arc<dyn Logger>) -> Self {
        let executable = locate_executable(&config.executable, &config.sdk_roots);
        if executable.is_none() {
            warn!(name = %config.executable, "Device bridge tool not found");
        }
        Self {
            config,
            executable,
            runner,
            logger,
        }
    }

    /// Build a controller with a known executable path, skipping discovery.
    pub fn with_executable(
        config: BridgeConfig,
        executable: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            config,
            executable: Some(executable.into()),
            runner,
            logger,
        }
    }

    pub fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn target_address(&self) -> Option<&str> {
        self.config.target_address.as_deref()
    }

    async fn run(&self, args: &[&str]) -> Result<CommandOutput, GuardError> {
        let program = self
            .executable
            .as_deref()
            .ok_or_else(|| GuardError::Bridge("device bridge tool not found".to_string()))?;
        let operation = format!("bridge.{}", args.first().copied().unwrap_or("run"));
        let output = track_operation(&operation, || {
            self.runner.run(program, args, self.config.command_timeout())
        })
        .await?;
        debug!(
            args = %args.join(" "),
            exit_code = ?output.exit_code,
            output = %sanitize_for_log(&output.combined()),
            "Bridge command finished"
        );
        Ok(output)
    }

    /// First line of `version` output, or `None` if the tool is unusable.
    pub async fn version(&self) -> Option<String> {
        let output = self.run(&["version"]).await.ok()?;
        output
            .combined()
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
    }

    pub async fn list_devices(&self) -> Result<Vec<DeviceEntry>, GuardError> {
        let output = self.run(&["devices"]).await?;
        if !output.success() {
            return Err(GuardError::Bridge(format!(
                "devices exited with {:?}: {}",
                output.exit_code,
                output.combined()
            )));
        }
        Ok(parse::parse_device_list(&output.stdout))
    }

    /// State of one address, `None` if it is not listed.
    pub async fn device_state(&self, address: &str) -> Result<Option<DeviceState>, GuardError> {
        Ok(self
            .list_devices()
            .await?
            .into_iter()
            .find(|d| d.address == address)
            .map(|d| d.state))
    }

    /// Devices bound to the loopback host.
    pub async fn loopback_devices(&self) -> Result<Vec<DeviceEntry>, GuardError> {
        Ok(self
            .list_devices()
            .await?
            .into_iter()
            .filter(|d| parse::is_loopback_address(&d.address, &self.config.host))
            .collect())
    }

    /// Connect and verify. Success requires the address to appear as
    /// `device` in a fresh listing.
    pub async fn connect(&self, address: &str) -> bool {
        let output = match self.run(&["connect", address]).await {
            Ok(output) => output,
            Err(e) => {
                self.logger
                    .warning(&format!("connect {} failed: {}", address, e));
                return false;
            }
        };

        if !parse::connect_reported_success(&output.combined()) {
            debug!(address, "Connect output did not report success");
            return false;
        }

        match self.device_state(address).await {
            Ok(Some(DeviceState::Connected)) => {
                info!(address, "Device connected");
                true
            }
            Ok(state) => {
                warn!(address, state = ?state, "Connect reported success but device is not ready");
                false
            }
            Err(e) => {
                warn!(address, error = %e, "Could not verify connection");
                false
            }
        }
    }

    pub async fn disconnect(&self, address: &str) -> bool {
        match self.run(&["disconnect", address]).await {
            Ok(output) => output.success(),
            Err(e) => {
                debug!(address, error = %e, "Disconnect failed");
                false
            }
        }
    }

    /// Kill then start the daemon, settling after each. Failures are logged
    /// and otherwise ignored.
    pub async fn restart_daemon(&self) {
        for subcommand in ["kill-server", "start-server"] {
            if let Err(e) = self.run(&[subcommand]).await {
                debug!(subcommand, error = %e, "Daemon command failed");
            }
            tokio::time::sleep(self.config.settle_delay()).await;
        }
    }

    /// Configured candidate ports as `host:port`, in priority order.
    pub fn candidate_addresses(&self) -> Vec<String> {
        self.config
            .candidate_ports
            .iter()
            .map(|port| format!("{}:{}", self.config.host, port))
            .collect()
    }

    /// Candidates with something listening, in priority order.
    pub async fn scan_candidates(&self, probe: &PortProbe) -> Vec<String> {
        let mut reachable = Vec::new();
        for port in &self.config.candidate_ports {
            if probe.is_reachable(&self.config.host, *port).await {
                reachable.push(format!("{}:{}", self.config.host, port));
            }
        }
        reachable
    }

    /// Connect the first reachable candidate that verifies.
    pub async fn connect_first_available(&self, probe: &PortProbe) -> Option<String> {
        for address in self.scan_candidates(probe).await {
            if self.connect(&address).await {
                self.logger.success(&format!("Connected to {}", address));
                return Some(address);
            }
        }
        self.logger.warning("No candidate device address accepted a connection");
        None
    }

    /// Remove every loopback-bound entry, restarting the daemon between
    /// rounds. Returns `false` if entries remain after `max_attempts`.
    pub async fn clear_zombie_connections(&self, max_attempts: u32) -> bool {
        let max_attempts = max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let bound = self.loopback_devices().await.unwrap_or_default();
            for device in &bound {
                self.disconnect(&device.address).await;
            }

            self.restart_daemon().await;
            tokio::time::sleep(self.config.settle_delay()).await;

            match self.loopback_devices().await {
                Ok(remaining) if remaining.is_empty() => {
                    self.logger.success(&format!(
                        "Cleared loopback connections (attempt {}/{})",
                        attempt, max_attempts
                    ));
                    return true;
                }
                Ok(remaining) => {
                    let addresses: Vec<_> = remaining.iter().map(|d| d.address.as_str()).collect();
                    self.logger.warning(&format!(
                        "{} loopback connection(s) remain after attempt {}/{}: {}",
                        remaining.len(),
                        attempt,
                        max_attempts,
                        addresses.join(", ")
                    ));
                }
                Err(e) => {
                    self.logger.warning(&format!(
                        "Could not list devices after cleanup attempt {}/{}: {}",
                        attempt, max_attempts, e
                    ));
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.config.zombie_retry_delay()).await;
            }
        }

        self.logger.error(&format!(
            "Zombie connections persist after {} attempt(s)",
            max_attempts
        ));
        false
    }

    /// Bring an offline address back. Each step is best-effort; the result
    /// is the final verification alone.
    pub async fn fix_offline_device(&self, address: &str) -> bool {
        self.logger
            .info(&format!("Repairing offline device {}", address));

        self.clear_zombie_connections(self.config.offline_fix_cleanup_attempts)
            .await;
        self.disconnect(address).await;
        self.restart_daemon().await;
        self.connect(address).await;

        let fixed = matches!(
            self.device_state(address).await,
            Ok(Some(DeviceState::Connected))
        );
        if fixed {
            self.logger.success(&format!("Device {} is back online", address));
        } else {
            self.logger
                .error(&format!("Device {} could not be brought online", address));
        }
        fixed
    }
}
