//! Assembled subsystem
//!
//! [`SessionGuard`] wires the bridge controller, status client, session
//! monitor, diagnostics, repair, error handling and the strategy executor
//! from one [`Config`]. It is the surface collaborators hold on to.

use crate::bridge::{BridgeController, CommandRunner, ProcessRunner};
use crate::config::Config;
use crate::diagnostics::{
    run_repair_cycle, AutoRepairEngine, DiagnosticReport, DiagnosticsEngine, RepairCycle,
};
use crate::errors::GuardError;
use crate::observability::Logger;
use crate::probe::PortProbe;
use crate::resource::{HostSampler, SysinfoSampler};
use crate::self_healing::{ErrorCategory, ErrorClassifier, ErrorHandler, RecoveryStrategyRegistry};
use crate::server::{ProcessLauncher, ServerClient, ServerLauncher};
use crate::session::webdriver::WebDriverSessionFactory;
use crate::session::{HealthReport, SessionFactory};
use crate::strategy::{MultiStrategyExecutor, Strategy, StrategyResult};
use crate::supervision::{MonitorSettings, SessionHealthMonitor};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// The external collaborators the subsystem drives.
pub struct Collaborators {
    pub runner: Arc<dyn CommandRunner>,
    pub factory: Arc<dyn SessionFactory>,
    pub sampler: Arc<dyn HostSampler>,
    pub launcher: Option<Arc<dyn ServerLauncher>>,
    /// Skip tool discovery and use this path
    pub bridge_executable: Option<PathBuf>,
}

impl Collaborators {
    /// Real processes, a WebDriver session factory and `sysinfo`.
    pub fn production(config: &Config, logger: Arc<dyn Logger>) -> Result<Self, GuardError> {
        Ok(Self {
            runner: Arc::new(ProcessRunner),
            factory: Arc::new(WebDriverSessionFactory::new(&config.server)?),
            sampler: Arc::new(SysinfoSampler::default()),
            launcher: ProcessLauncher::from_config(&config.server, logger)
                .map(|l| Arc::new(l) as Arc<dyn ServerLauncher>),
            bridge_executable: None,
        })
    }
}

pub struct SessionGuard {
    config: Config,
    bridge: Arc<BridgeController>,
    server: Arc<ServerClient>,
    monitor: Arc<SessionHealthMonitor>,
    factory: Arc<dyn SessionFactory>,
    diagnostics: DiagnosticsEngine,
    repairer: AutoRepairEngine,
    handler: ErrorHandler,
    executor: MultiStrategyExecutor,
    logger: Arc<dyn Logger>,
}

impl SessionGuard {
    pub fn from_config(config: Config, logger: Arc<dyn Logger>) -> Result<Self, GuardError> {
        let collaborators = Collaborators::production(&config, logger.clone())?;
        Self::new(config, collaborators, logger)
    }

    pub fn new(
        config: Config,
        collaborators: Collaborators,
        logger: Arc<dyn Logger>,
    ) -> Result<Self, GuardError> {
        config.validate()?;

        let bridge = Arc::new(match collaborators.bridge_executable {
            Some(path) => BridgeController::with_executable(
                config.bridge.clone(),
                path,
                collaborators.runner,
                logger.clone(),
            ),
            None => BridgeController::new(config.bridge.clone(), collaborators.runner, logger.clone()),
        });
        let server = Arc::new(ServerClient::new(config.server.clone())?);
        let monitor = Arc::new(SessionHealthMonitor::new(
            collaborators.factory.clone(),
            MonitorSettings::from(&config.monitor),
            logger.clone(),
        ));

        let diagnostics = DiagnosticsEngine::new(
            bridge.clone(),
            server.clone(),
            collaborators.sampler,
            config.diagnostics.clone(),
            logger.clone(),
        )
        .with_monitor(monitor.clone());

        let mut repairer = AutoRepairEngine::new(
            bridge.clone(),
            server.clone(),
            PortProbe::new(config.diagnostics.probe_timeout()),
            logger.clone(),
        )
        .with_monitor(monitor.clone());
        if let Some(launcher) = collaborators.launcher {
            repairer = repairer.with_launcher(launcher);
        }

        let registry = Arc::new(RecoveryStrategyRegistry::new());
        register_default_recoveries(&registry, &bridge, &server, &monitor);
        let handler = ErrorHandler::new(
            Arc::new(ErrorClassifier::default()),
            registry,
            config.retry,
            logger.clone(),
        );
        let executor = MultiStrategyExecutor::new(config.retry, logger.clone());

        Ok(Self {
            config,
            bridge,
            server,
            monitor,
            factory: collaborators.factory,
            diagnostics,
            repairer,
            handler,
            executor,
            logger,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bridge(&self) -> &Arc<BridgeController> {
        &self.bridge
    }

    pub fn server(&self) -> &Arc<ServerClient> {
        &self.server
    }

    pub fn monitor(&self) -> &Arc<SessionHealthMonitor> {
        &self.monitor
    }

    pub fn diagnostics(&self) -> &DiagnosticsEngine {
        &self.diagnostics
    }

    pub fn repairer(&self) -> &AutoRepairEngine {
        &self.repairer
    }

    pub fn handler(&self) -> &ErrorHandler {
        &self.handler
    }

    pub fn executor(&self) -> &MultiStrategyExecutor {
        &self.executor
    }

    /// Create a session with the factory and hand it to the monitor.
    pub async fn open_session(&self) -> Result<(), GuardError> {
        let session = self.factory.create().await?;
        if self.monitor.attach(session).await {
            info!(session_id = ?self.monitor.slot().session_id(), "Session attached");
            Ok(())
        } else {
            Err(GuardError::SessionInvalid(
                "new session failed its first health check".to_string(),
            ))
        }
    }

    pub async fn diagnose_all(&self) -> DiagnosticReport {
        self.diagnostics.diagnose_all().await
    }

    pub async fn repair(&self, report: &DiagnosticReport) -> bool {
        self.repairer.repair(report).await
    }

    /// Diagnose, repair what is auto-fixable, and diagnose again.
    pub async fn diagnose_and_repair(&self) -> RepairCycle {
        run_repair_cycle(&self.diagnostics, &self.repairer).await
    }

    pub fn get_health_report(&self) -> HealthReport {
        self.monitor.get_health_report()
    }

    pub async fn execute<T: Send + 'static>(
        &self,
        strategies: &[Strategy<T>],
        task_name: &str,
    ) -> StrategyResult<T> {
        self.executor.execute(strategies, task_name).await
    }

    pub async fn handle(&self, error: &GuardError, context: &str) -> bool {
        self.handler.handle_default(error, context).await
    }

    pub fn start_monitoring(&self) -> bool {
        self.monitor.start_monitoring()
    }

    pub async fn shutdown(&self) {
        self.monitor.shutdown().await;
        self.logger.info("Session guard stopped");
    }
}

/// Network failures re-check both endpoints; session and timeout failures
/// go through the reconnect controller. Resource exhaustion has no
/// automatic remedy.
fn register_default_recoveries(
    registry: &RecoveryStrategyRegistry,
    bridge: &Arc<BridgeController>,
    server: &Arc<ServerClient>,
    monitor: &Arc<SessionHealthMonitor>,
) {
    let (bridge, server) = (bridge.clone(), server.clone());
    registry.register(ErrorCategory::Network, move || {
        let (bridge, server) = (bridge.clone(), server.clone());
        async move {
            let device_ok = match bridge.target_address() {
                Some(target) => bridge.connect(target).await,
                None => true,
            };
            device_ok && server.status().await.is_ready()
        }
    });

    let session_monitor = monitor.clone();
    registry.register(ErrorCategory::SessionInvalid, move || {
        let monitor = session_monitor.clone();
        async move { monitor.reconnect().await }
    });

    let timeout_monitor = monitor.clone();
    registry.register(ErrorCategory::Timeout, move || {
        let monitor = timeout_monitor.clone();
        async move { monitor.check_health(false).await || monitor.reconnect().await }
    });
}
