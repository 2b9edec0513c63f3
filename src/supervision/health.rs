//! Background liveness monitoring for one automation session.

use super::{MonitorSettings, ReconnectController};
use crate::observability::Logger;
use crate::session::{AutomationSession, HealthReport, SessionFactory, SessionSlot};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct MonitorTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct SessionHealthMonitor {
    slot: Arc<SessionSlot>,
    reconnector: Arc<ReconnectController>,
    settings: MonitorSettings,
    logger: Arc<dyn Logger>,
    task: Mutex<Option<MonitorTask>>,
}

impl SessionHealthMonitor {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        settings: MonitorSettings,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let slot = Arc::new(
            SessionSlot::new(settings.ping_timeout)
                .with_liveness_window(settings.health_check_interval),
        );
        let reconnector = Arc::new(ReconnectController::new(
            slot.clone(),
            factory,
            settings.clone(),
            logger.clone(),
        ));
        Self {
            slot,
            reconnector,
            settings,
            logger,
            task: Mutex::new(None),
        }
    }

    pub fn slot(&self) -> &Arc<SessionSlot> {
        &self.slot
    }

    pub fn reconnector(&self) -> &Arc<ReconnectController> {
        &self.reconnector
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Take ownership of an externally created session and validate it.
    pub async fn attach(&self, session: Arc<dyn AutomationSession>) -> bool {
        if let Some(old) = self.slot.install(session) {
            let _ = tokio::time::timeout(self.settings.ping_timeout, old.close()).await;
        }
        if self.slot.check_health(true).await {
            self.slot.mark_alive();
            true
        } else {
            false
        }
    }

    pub async fn check_health(&self, quick: bool) -> bool {
        self.slot.check_health(quick).await
    }

    /// Caller-initiated reconnect; serialized with the background loop.
    pub async fn reconnect(&self) -> bool {
        self.reconnector.reconnect().await
    }

    pub fn get_health_report(&self) -> HealthReport {
        self.slot.report(self.settings.health_check_interval)
    }

    pub fn is_monitoring(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Spawn the background loop. Returns `false` if one is already running.
    pub fn start_monitoring(&self) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(monitor_loop(
            self.slot.clone(),
            self.reconnector.clone(),
            self.settings.health_check_interval,
            self.logger.clone(),
            stop_rx,
        ));
        *task = Some(MonitorTask { stop_tx, handle });
        info!(
            interval_secs = self.settings.health_check_interval.as_secs_f64(),
            "Session monitoring started"
        );
        true
    }

    /// Signal the loop and wait for it, bounded by the join timeout.
    /// A reconnect in flight is not aborted; it finishes on its own.
    pub async fn stop_monitoring(&self) -> bool {
        let Some(task) = self.task.lock().take() else {
            return true;
        };
        let _ = task.stop_tx.send(true);
        match tokio::time::timeout(self.settings.shutdown_join_timeout, task.handle).await {
            Ok(_) => {
                debug!("Session monitoring stopped");
                true
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.settings.shutdown_join_timeout.as_secs(),
                    "Monitor did not stop in time"
                );
                false
            }
        }
    }

    /// Stop monitoring, then release the held session. A reconnect still
    /// in flight is awaited so the session it installs is closed too.
    pub async fn shutdown(&self) {
        self.stop_monitoring().await;
        self.reconnector.wait_idle().await;
        if let Some(session) = self.slot.take() {
            match tokio::time::timeout(self.settings.ping_timeout, session.close()).await {
                Ok(Ok(())) => debug!("Session closed"),
                Ok(Err(e)) => debug!(error = %e, "Session close failed"),
                Err(_) => debug!("Session close timed out"),
            }
        }
        self.logger.info("Session monitor shut down");
    }
}

async fn monitor_loop(
    slot: Arc<SessionSlot>,
    reconnector: Arc<ReconnectController>,
    interval: Duration,
    logger: Arc<dyn Logger>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
                continue;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        if slot.check_health(false).await {
            continue;
        }

        logger.warning("Session health check failed");
        if !reconnector.reconnect().await {
            logger.error("Session monitor stopping: reconnect budget exhausted");
            break;
        }
    }
}
