use super::{titles, DiagnosticIssue, DiagnosticReport, IssueCategory, Severity};
use crate::bridge::parse::is_loopback_address;
use crate::bridge::{BridgeController, DeviceEntry, DeviceState};
use crate::config::DiagnosticsConfig;
use crate::observability::Logger;
use crate::probe::PortProbe;
use crate::resource::{HostSampler, ResourcePressure};
use crate::server::{ServerClient, ServerStatus};
use crate::session::SessionPhase;
use crate::supervision::SessionHealthMonitor;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Faults already reported by a higher layer. A network-level issue for the
/// same endpoint is suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RootCause {
    DeviceEndpoint,
    ServerEndpoint,
}

pub struct DiagnosticsEngine {
    bridge: Arc<BridgeController>,
    server: Arc<ServerClient>,
    sampler: Arc<dyn HostSampler>,
    probe: PortProbe,
    config: DiagnosticsConfig,
    monitor: Option<Arc<SessionHealthMonitor>>,
    logger: Arc<dyn Logger>,
}

impl DiagnosticsEngine {
    pub fn new(
        bridge: Arc<BridgeController>,
        server: Arc<ServerClient>,
        sampler: Arc<dyn HostSampler>,
        config: DiagnosticsConfig,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            bridge,
            server,
            sampler,
            probe: PortProbe::new(config.probe_timeout()),
            config,
            monitor: None,
            logger,
        }
    }

    /// Include a session liveness probe.
    pub fn with_monitor(mut self, monitor: Arc<SessionHealthMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn probe(&self) -> &PortProbe {
        &self.probe
    }

    /// Run every probe in a fixed order and return the ranked report.
    pub async fn diagnose_all(&self) -> DiagnosticReport {
        self.logger.info("Running diagnostics");
        let mut report = DiagnosticReport::new();
        let mut reported = HashSet::new();

        if self.check_bridge_tool(&mut report).await {
            self.check_devices(&mut report, &mut reported).await;
        }
        self.check_server(&mut report, &mut reported).await;
        self.check_ports(&mut report, &reported).await;
        self.check_host(&mut report).await;
        self.check_session(&mut report).await;

        report.finish();
        let critical = report.count(Severity::Critical);
        let warnings = report.count(Severity::Warning);
        if critical > 0 {
            self.logger.error(&format!(
                "Diagnostics found {} critical issue(s), {} warning(s)",
                critical, warnings
            ));
        } else if warnings > 0 {
            self.logger
                .warning(&format!("Diagnostics found {} warning(s)", warnings));
        } else {
            self.logger.success("Diagnostics found no problems");
        }
        report
    }

    /// Returns whether the tool is usable for the device-list probe.
    async fn check_bridge_tool(&self, report: &mut DiagnosticReport) -> bool {
        let Some(path) = self.bridge.executable() else {
            report.set_status("bridge", "tool", "missing");
            report.push(
                DiagnosticIssue::new(
                    IssueCategory::Bridge,
                    Severity::Critical,
                    titles::BRIDGE_TOOL_MISSING,
                    format!(
                        "'{}' was not found in any SDK location or on PATH",
                        self.bridge.config().executable
                    ),
                )
                .causes(&[
                    "Platform tools are not installed",
                    "The SDK directory is not on PATH",
                ])
                .fixes(&[
                    "Install the platform tools",
                    "Set bridge.executable to the full path of the tool",
                    "Set ANDROID_SDK_ROOT to the SDK directory",
                ]),
            );
            return false;
        };

        report.set_status("bridge", "tool", path.display());
        if let Some(version) = self.bridge.version().await {
            report.set_status("bridge", "version", version);
        }
        true
    }

    async fn check_devices(&self, report: &mut DiagnosticReport, reported: &mut HashSet<RootCause>) {
        let devices = match self.bridge.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                report.set_status("bridge", "devices", "error");
                report.push(
                    DiagnosticIssue::new(
                        IssueCategory::Bridge,
                        Severity::Critical,
                        titles::BRIDGE_UNRESPONSIVE,
                        format!("Listing devices failed: {}", e),
                    )
                    .causes(&["The bridge daemon is hung", "Another tool holds the daemon port"])
                    .fixes(&["Restart the bridge daemon"])
                    .auto_fixable(),
                );
                reported.insert(RootCause::DeviceEndpoint);
                return;
            }
        };

        report.set_status("bridge", "devices", devices.len());
        let target = self.bridge.target_address();
        if let Some(target) = target {
            self.check_target(report, reported, &devices, target);
        } else if !devices.iter().any(|d| d.state == DeviceState::Connected) {
            report.push(
                DiagnosticIssue::new(
                    IssueCategory::Bridge,
                    Severity::Critical,
                    titles::NO_DEVICES,
                    "No device is attached in the 'device' state",
                )
                .causes(&["The emulator is not running", "The emulator uses a non-default port"])
                .fixes(&[
                    "Start the emulator",
                    "Set bridge.target_address to the emulator's address",
                ])
                .auto_fixable(),
            );
            reported.insert(RootCause::DeviceEndpoint);
        }

        let zombies: Vec<&DeviceEntry> = devices
            .iter()
            .filter(|d| {
                d.state.is_zombie()
                    && Some(d.address.as_str()) != target
                    && is_loopback_address(&d.address, &self.bridge.config().host)
            })
            .collect();
        report.set_status("bridge", "zombies", zombies.len());
        if !zombies.is_empty() {
            let addresses: Vec<&str> = zombies.iter().map(|d| d.address.as_str()).collect();
            report.push(
                DiagnosticIssue::new(
                    IssueCategory::Bridge,
                    Severity::Warning,
                    titles::ZOMBIE_CONNECTIONS,
                    format!(
                        "{} stale connection(s): {}",
                        zombies.len(),
                        addresses.join(", ")
                    ),
                )
                .causes(&["A device went away without disconnecting"])
                .fixes(&["Disconnect stale entries and restart the bridge daemon"])
                .auto_fixable(),
            );
        }
    }

    fn check_target(
        &self,
        report: &mut DiagnosticReport,
        reported: &mut HashSet<RootCause>,
        devices: &[DeviceEntry],
        target: &str,
    ) {
        let entry = devices.iter().find(|d| d.address == target);
        let state = entry.map(|d| d.state);
        report.set_status(
            "bridge",
            "target",
            state.map(|s| s.to_string()).unwrap_or_else(|| "absent".to_string()),
        );

        let issue = match state {
            Some(DeviceState::Connected) => return,
            Some(DeviceState::Offline) => DiagnosticIssue::new(
                IssueCategory::Bridge,
                Severity::Critical,
                titles::DEVICE_OFFLINE,
                format!("{} is listed as offline", target),
            )
            .causes(&[
                "The emulator froze or restarted",
                "A stale connection from a previous run",
            ])
            .fixes(&["Reconnect the device", "Restart the emulator"])
            .auto_fixable(),
            Some(DeviceState::Unauthorized) => DiagnosticIssue::new(
                IssueCategory::Bridge,
                Severity::Critical,
                titles::DEVICE_UNAUTHORIZED,
                format!("{} has not authorized this host", target),
            )
            .causes(&["The debugging authorization prompt was not accepted"])
            .fixes(&["Accept the authorization prompt on the device", "Revoke and re-grant debugging authorization"]),
            Some(DeviceState::Unknown) => DiagnosticIssue::new(
                IssueCategory::Bridge,
                Severity::Critical,
                titles::DEVICE_NOT_FOUND,
                format!(
                    "{} is listed in an unrecognized state '{}'",
                    target,
                    entry.map(|d| d.raw_state.as_str()).unwrap_or_default()
                ),
            )
            .causes(&["The device is booting or in a recovery mode"])
            .fixes(&["Wait for the device to finish booting", "Reconnect the device address"])
            .auto_fixable(),
            None => DiagnosticIssue::new(
                IssueCategory::Bridge,
                Severity::Critical,
                titles::DEVICE_NOT_FOUND,
                format!("{} is not in the device list", target),
            )
            .causes(&["The emulator is not running", "The device was never connected"])
            .fixes(&["Start the emulator", "Connect the device address"])
            .auto_fixable(),
        };
        report.push(issue.subject(target));
        reported.insert(RootCause::DeviceEndpoint);
    }

    async fn check_server(&self, report: &mut DiagnosticReport, reported: &mut HashSet<RootCause>) {
        let url = self.server.status_url();
        let status = self.server.status().await;
        debug!(status = ?status, "Server status probe");

        let issue = match &status {
            ServerStatus::Ready { build, elapsed_ms } => {
                report.set_status("server", "status", "ready");
                report.set_status("server", "elapsed_ms", elapsed_ms);
                let description = match build {
                    Some(build) => format!("{} answered in {} ms (build {})", url, elapsed_ms, build),
                    None => format!("{} answered in {} ms", url, elapsed_ms),
                };
                DiagnosticIssue::new(
                    IssueCategory::AutomationServer,
                    Severity::Info,
                    titles::SERVER_READY,
                    description,
                )
            }
            ServerStatus::Slow { elapsed_ms } => {
                report.set_status("server", "status", "slow");
                report.set_status("server", "elapsed_ms", elapsed_ms);
                DiagnosticIssue::new(
                    IssueCategory::AutomationServer,
                    Severity::Warning,
                    titles::SERVER_SLOW,
                    format!("{} took {} ms to answer", url, elapsed_ms),
                )
                .causes(&["The host is under load", "The server is still starting"])
                .fixes(&["Reduce host load", "Wait for the server to finish starting"])
            }
            ServerStatus::NotReady { message } => {
                report.set_status("server", "status", "not_ready");
                DiagnosticIssue::new(
                    IssueCategory::AutomationServer,
                    Severity::Warning,
                    titles::SERVER_NOT_READY,
                    format!("{} reports not ready: {}", url, message),
                )
                .fixes(&["Wait for the server to finish starting"])
            }
            ServerStatus::TimedOut => {
                report.set_status("server", "status", "timeout");
                reported.insert(RootCause::ServerEndpoint);
                DiagnosticIssue::new(
                    IssueCategory::AutomationServer,
                    Severity::Warning,
                    titles::SERVER_TIMEOUT,
                    format!(
                        "{} did not answer within {}s",
                        url,
                        self.server.config().status_timeout().as_secs()
                    ),
                )
                .causes(&["The server is hung", "The host is overloaded"])
                .fixes(&["Restart the automation server"])
            }
            ServerStatus::Refused => {
                report.set_status("server", "status", "refused");
                reported.insert(RootCause::ServerEndpoint);
                DiagnosticIssue::new(
                    IssueCategory::AutomationServer,
                    Severity::Critical,
                    titles::SERVER_NOT_RUNNING,
                    format!("Connection to {} was refused", url),
                )
                .causes(&["The automation server is not started", "It crashed"])
                .fixes(&["Start the automation server", "Check server.base_url"])
                .auto_fixable()
            }
            ServerStatus::HttpError { code } => {
                report.set_status("server", "status", format!("http_{}", code));
                DiagnosticIssue::new(
                    IssueCategory::AutomationServer,
                    Severity::Critical,
                    titles::SERVER_HTTP_ERROR,
                    format!("{} answered HTTP {}", url, code),
                )
                .causes(&["Another service owns the port", "The status path is wrong"])
                .fixes(&["Check server.base_url and server.status_path"])
            }
            ServerStatus::Unreachable { message } => {
                report.set_status("server", "status", "unreachable");
                reported.insert(RootCause::ServerEndpoint);
                DiagnosticIssue::new(
                    IssueCategory::AutomationServer,
                    Severity::Critical,
                    titles::SERVER_UNREACHABLE,
                    format!("{} could not be reached: {}", url, message),
                )
                .causes(&["The host name does not resolve", "A firewall blocks the port"])
                .fixes(&["Check server.base_url", "Check network connectivity"])
            }
        };
        report.push(issue.subject(url));
    }

    async fn check_ports(&self, report: &mut DiagnosticReport, reported: &HashSet<RootCause>) {
        if let Some(target) = self.bridge.target_address() {
            let reachable = self.probe.is_address_reachable(target).await;
            report.set_status("network", target, if reachable { "open" } else { "closed" });
            if !reachable && !reported.contains(&RootCause::DeviceEndpoint) {
                report.push(
                    DiagnosticIssue::new(
                        IssueCategory::Network,
                        Severity::Critical,
                        titles::DEVICE_PORT_UNREACHABLE,
                        format!("Nothing accepts connections on {}", target),
                    )
                    .causes(&["The emulator is not running", "The emulator listens on another port"])
                    .fixes(&["Start the emulator", "Check bridge.target_address"])
                    .subject(target),
                );
            }
        }

        if let Some((host, port)) = self.server.config().endpoint() {
            let address = format!("{}:{}", host, port);
            let reachable = self.probe.is_reachable(&host, port).await;
            report.set_status("network", &address, if reachable { "open" } else { "closed" });
            if !reachable && !reported.contains(&RootCause::ServerEndpoint) {
                report.push(
                    DiagnosticIssue::new(
                        IssueCategory::Network,
                        Severity::Critical,
                        titles::SERVER_PORT_UNREACHABLE,
                        format!("Nothing accepts connections on {}", address),
                    )
                    .fixes(&["Start the automation server"])
                    .subject(address),
                );
            }
        }
    }

    async fn check_host(&self, report: &mut DiagnosticReport) {
        let snapshot = match self.sampler.sample().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                report.push(DiagnosticIssue::new(
                    IssueCategory::Host,
                    Severity::Info,
                    titles::HOST_SAMPLING_FAILED,
                    format!("Could not sample host resources: {}", e),
                ));
                return;
            }
        };

        report.set_status("host", "cpu_percent", format!("{:.1}", snapshot.cpu_percent));
        report.set_status("host", "memory_percent", format!("{:.1}", snapshot.memory_percent));
        if let Some(disk) = snapshot.disk_percent {
            report.set_status("host", "disk_percent", format!("{:.1}", disk));
        }

        let checks = [
            (
                Some(snapshot.cpu_percent),
                &self.config.cpu,
                titles::HIGH_CPU,
                "CPU",
                "Close other CPU-heavy programs",
            ),
            (
                Some(snapshot.memory_percent),
                &self.config.memory,
                titles::HIGH_MEMORY,
                "Memory",
                "Close other memory-heavy programs",
            ),
            (
                snapshot.disk_percent,
                &self.config.disk,
                titles::LOW_DISK,
                "Disk",
                "Free disk space",
            ),
        ];

        for (value, band, title, label, fix) in checks {
            let Some(value) = value else { continue };
            let severity = match ResourcePressure::evaluate(value, band) {
                ResourcePressure::None => continue,
                ResourcePressure::Warning => Severity::Warning,
                ResourcePressure::Critical => Severity::Critical,
            };
            report.push(
                DiagnosticIssue::new(
                    IssueCategory::Host,
                    severity,
                    title,
                    format!(
                        "{} usage at {:.1}% (warning {:.0}%, critical {:.0}%)",
                        label, value, band.warning, band.critical
                    ),
                )
                .fixes(&[fix]),
            );
        }
    }

    async fn check_session(&self, report: &mut DiagnosticReport) {
        let Some(monitor) = &self.monitor else {
            return;
        };
        if monitor.slot().current().is_none() && monitor.slot().phase() == SessionPhase::Uninitialized {
            report.set_status("session", "phase", SessionPhase::Uninitialized);
            return;
        }
        let verdict = monitor.slot().inspect().await;
        let health = monitor.get_health_report();
        report.set_status("session", "phase", health.phase);
        if let Some(id) = &health.session_id {
            report.set_status("session", "id", id);
        }
        let Err(reason) = verdict else {
            return;
        };
        // With nothing held, the last recorded error says more than the check
        let reason = match health.last_error {
            Some(last) if monitor.slot().current().is_none() => last,
            _ => reason,
        };
        report.push(
            DiagnosticIssue::new(
                IssueCategory::AutomationServer,
                Severity::Critical,
                titles::SESSION_LOST,
                reason,
            )
            .causes(&["The server restarted", "The session expired server-side"])
            .fixes(&["Create a new session"])
            .auto_fixable(),
        );
    }
}
