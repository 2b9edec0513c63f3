use super::{titles, DiagnosticIssue, DiagnosticReport, DiagnosticsEngine, IssueCategory};
use crate::bridge::BridgeController;
use crate::observability::Logger;
use crate::probe::PortProbe;
use crate::server::{ServerClient, ServerLauncher};
use crate::supervision::SessionHealthMonitor;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// The fixed catalog of repairs. Nothing outside this list is ever attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RepairAction {
    StartAutomationServer,
    FixOfflineDevice { address: String },
    ClearZombies,
    /// Connect the given address, or the first reachable candidate port
    ConnectDevice { address: Option<String> },
    RestartBridgeDaemon,
    ReconnectSession,
}

impl std::fmt::Display for RepairAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StartAutomationServer => write!(f, "start automation server"),
            Self::FixOfflineDevice { address } => write!(f, "fix offline device {}", address),
            Self::ClearZombies => write!(f, "clear stale connections"),
            Self::ConnectDevice { address: Some(a) } => write!(f, "connect {}", a),
            Self::ConnectDevice { address: None } => write!(f, "connect first available device"),
            Self::RestartBridgeDaemon => write!(f, "restart bridge daemon"),
            Self::ReconnectSession => write!(f, "reconnect session"),
        }
    }
}

/// Map an issue to its repair, or `None` if it is not auto-fixable.
pub fn plan_repair(issue: &DiagnosticIssue) -> Option<RepairAction> {
    if !issue.auto_fixable {
        return None;
    }
    match (issue.category, issue.title.as_str()) {
        (IssueCategory::AutomationServer, titles::SERVER_NOT_RUNNING) => {
            Some(RepairAction::StartAutomationServer)
        }
        (IssueCategory::AutomationServer, titles::SESSION_LOST) => {
            Some(RepairAction::ReconnectSession)
        }
        (IssueCategory::Bridge, titles::DEVICE_OFFLINE) => issue
            .subject
            .clone()
            .map(|address| RepairAction::FixOfflineDevice { address }),
        (IssueCategory::Bridge, titles::DEVICE_NOT_FOUND) => Some(RepairAction::ConnectDevice {
            address: issue.subject.clone(),
        }),
        (IssueCategory::Bridge, titles::NO_DEVICES) => {
            Some(RepairAction::ConnectDevice { address: None })
        }
        (IssueCategory::Bridge, titles::ZOMBIE_CONNECTIONS) => Some(RepairAction::ClearZombies),
        (IssueCategory::Bridge, titles::BRIDGE_UNRESPONSIVE) => {
            Some(RepairAction::RestartBridgeDaemon)
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairRecord {
    pub action: RepairAction,
    pub issue_title: String,
    pub success: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairSummary {
    pub records: Vec<RepairRecord>,
}

impl RepairSummary {
    pub fn attempted(&self) -> usize {
        self.records.len()
    }

    pub fn succeeded(&self) -> usize {
        self.records.iter().filter(|r| r.success).count()
    }

    /// Vacuously true when nothing was attempted.
    pub fn all_succeeded(&self) -> bool {
        self.records.iter().all(|r| r.success)
    }
}

pub struct AutoRepairEngine {
    bridge: Arc<BridgeController>,
    server: Arc<ServerClient>,
    launcher: Option<Arc<dyn ServerLauncher>>,
    monitor: Option<Arc<SessionHealthMonitor>>,
    probe: PortProbe,
    zombie_attempts: u32,
    ready_poll_attempts: u32,
    ready_poll_interval: Duration,
    logger: Arc<dyn Logger>,
}

impl AutoRepairEngine {
    pub fn new(
        bridge: Arc<BridgeController>,
        server: Arc<ServerClient>,
        probe: PortProbe,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let zombie_attempts = bridge.config().zombie_cleanup_attempts;
        let ready_poll_attempts = server.config().ready_poll_attempts;
        let ready_poll_interval = server.config().ready_poll_interval();
        Self {
            bridge,
            server,
            launcher: None,
            monitor: None,
            probe,
            zombie_attempts,
            ready_poll_attempts,
            ready_poll_interval,
            logger,
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ServerLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<SessionHealthMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_ready_polling(mut self, attempts: u32, interval: Duration) -> Self {
        self.ready_poll_attempts = attempts;
        self.ready_poll_interval = interval;
        self
    }

    /// Apply every planned repair; true only if all of them succeeded.
    pub async fn repair(&self, report: &DiagnosticReport) -> bool {
        self.repair_detailed(report).await.all_succeeded()
    }

    /// Apply every planned repair once, in report order, and record each
    /// outcome. Two issues planning the same action share one attempt.
    pub async fn repair_detailed(&self, report: &DiagnosticReport) -> RepairSummary {
        let mut summary = RepairSummary::default();
        let mut done: Vec<RepairAction> = Vec::new();

        for issue in report.auto_fixable_issues() {
            let Some(action) = plan_repair(issue) else {
                debug!(title = %issue.title, "No repair planned");
                continue;
            };
            if done.contains(&action) {
                continue;
            }

            self.logger
                .info(&format!("Repairing '{}': {}", issue.title, action));
            let started = Instant::now();
            let success = self.apply(&action).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            if success {
                self.logger.success(&format!("Repaired: {}", action));
            } else {
                self.logger.error(&format!("Repair failed: {}", action));
            }

            summary.records.push(RepairRecord {
                action: action.clone(),
                issue_title: issue.title.clone(),
                success,
                elapsed_ms,
            });
            done.push(action);
        }

        info!(
            attempted = summary.attempted(),
            succeeded = summary.succeeded(),
            "Repair pass finished"
        );
        summary
    }

    async fn apply(&self, action: &RepairAction) -> bool {
        match action {
            RepairAction::StartAutomationServer => self.start_server().await,
            RepairAction::FixOfflineDevice { address } => {
                self.bridge.fix_offline_device(address).await
            }
            RepairAction::ClearZombies => {
                self.bridge
                    .clear_zombie_connections(self.zombie_attempts)
                    .await
            }
            RepairAction::ConnectDevice { address: Some(address) } => {
                self.bridge.connect(address).await
            }
            RepairAction::ConnectDevice { address: None } => self
                .bridge
                .connect_first_available(&self.probe)
                .await
                .is_some(),
            RepairAction::RestartBridgeDaemon => {
                self.bridge.restart_daemon().await;
                self.bridge.list_devices().await.is_ok()
            }
            RepairAction::ReconnectSession => match &self.monitor {
                Some(monitor) => monitor.reconnect().await,
                None => {
                    self.logger
                        .warning("No session monitor attached; cannot reconnect");
                    false
                }
            },
        }
    }

    async fn start_server(&self) -> bool {
        if self.server.status().await.is_ready() {
            return true;
        }
        let Some(launcher) = &self.launcher else {
            self.logger
                .error("No launch command configured for the automation server");
            return false;
        };
        if let Err(e) = launcher.launch().await {
            self.logger.error(&e.to_string());
            return false;
        }
        let ready = self
            .server
            .wait_until_ready(self.ready_poll_attempts, self.ready_poll_interval)
            .await;
        if !ready {
            self.logger.error(&format!(
                "Automation server not ready after {} poll(s)",
                self.ready_poll_attempts
            ));
        }
        ready
    }
}

/// One diagnose, repair, re-diagnose pass.
#[derive(Debug, Clone, Serialize)]
pub struct RepairCycle {
    pub initial: DiagnosticReport,
    /// Absent when the initial report had nothing auto-fixable
    pub summary: Option<RepairSummary>,
    pub final_report: Option<DiagnosticReport>,
}

impl RepairCycle {
    /// The report that reflects the current state.
    pub fn latest(&self) -> &DiagnosticReport {
        self.final_report.as_ref().unwrap_or(&self.initial)
    }
}

pub async fn run_repair_cycle(
    diagnostics: &DiagnosticsEngine,
    repairer: &AutoRepairEngine,
) -> RepairCycle {
    let initial = diagnostics.diagnose_all().await;
    if initial.auto_fixable_issues().next().is_none() {
        return RepairCycle {
            initial,
            summary: None,
            final_report: None,
        };
    }
    let summary = repairer.repair_detailed(&initial).await;
    let final_report = diagnostics.diagnose_all().await;
    RepairCycle {
        initial,
        summary: Some(summary),
        final_report: Some(final_report),
    }
}
