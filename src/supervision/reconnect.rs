//! Serialized session re-establishment.

use super::MonitorSettings;
use crate::observability::Logger;
use crate::session::{SessionFactory, SessionSlot};
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Tears down a dead session and builds a new one with the caller's
/// factory.
///
/// One procedure runs at a time per slot. A caller that queued behind a
/// running procedure gets that procedure's outcome instead of starting
/// another.
pub struct ReconnectController {
    slot: Arc<SessionSlot>,
    factory: Arc<dyn SessionFactory>,
    settings: MonitorSettings,
    lock: Mutex<()>,
    generation: AtomicU64,
    last_outcome: SyncMutex<Option<bool>>,
    logger: Arc<dyn Logger>,
}

impl ReconnectController {
    pub fn new(
        slot: Arc<SessionSlot>,
        factory: Arc<dyn SessionFactory>,
        settings: MonitorSettings,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            slot,
            factory,
            settings,
            lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            last_outcome: SyncMutex::new(None),
            logger,
        }
    }

    /// Number of completed procedures.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Resolve once no procedure is running.
    pub async fn wait_idle(&self) {
        let _guard = self.lock.lock().await;
    }

    pub async fn reconnect(&self) -> bool {
        let observed = self.generation.load(Ordering::SeqCst);
        let _guard = self.lock.lock().await;

        if self.generation.load(Ordering::SeqCst) != observed {
            if let Some(outcome) = *self.last_outcome.lock() {
                debug!(outcome, "Joined reconnect already in flight");
                return outcome;
            }
        }

        let outcome = self.run_procedure().await;
        *self.last_outcome.lock() = Some(outcome);
        self.generation.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    async fn run_procedure(&self) -> bool {
        let teardown = self.settings.ping_timeout;
        let max_attempts = self.settings.max_reconnect_attempts.max(1);

        self.slot.begin_reconnect();
        self.logger.warning("Automation session lost, reconnecting");

        let mut location = None;
        if let Some(old) = self.slot.take() {
            location = tokio::time::timeout(teardown, old.current_location())
                .await
                .ok()
                .flatten();
            match tokio::time::timeout(teardown, old.close()).await {
                Ok(Err(e)) => debug!(error = %e, "Closing old session failed"),
                Err(_) => debug!("Closing old session timed out"),
                Ok(Ok(())) => {}
            }
        }

        for attempt in 1..=max_attempts {
            let delay = self.settings.backoff.delay_before(attempt);
            if !delay.is_zero() {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before reconnect");
                tokio::time::sleep(delay).await;
            }

            let created =
                tokio::time::timeout(self.settings.reconnect_timeout, self.factory.create()).await;
            let session = match created {
                Ok(Ok(session)) => session,
                Ok(Err(e)) => {
                    self.attempt_failed(attempt, max_attempts, &e.to_string());
                    continue;
                }
                Err(_) => {
                    let message = format!(
                        "session factory timed out after {}s",
                        self.settings.reconnect_timeout.as_secs()
                    );
                    self.attempt_failed(attempt, max_attempts, &message);
                    continue;
                }
            };

            self.slot.install(session.clone());
            if !self.slot.check_health(true).await {
                self.slot.record_reconnect_attempt(None);
                warn!(attempt, "New session failed validation");
                if let Some(bad) = self.slot.take() {
                    let _ = tokio::time::timeout(teardown, bad.close()).await;
                }
                continue;
            }

            if let Some(location) = &location {
                match tokio::time::timeout(teardown, session.restore_location(location)).await {
                    Ok(Ok(())) => debug!(location = %location, "Restored session location"),
                    _ => debug!(location = %location, "Could not restore session location"),
                }
            }

            self.slot.finish_reconnect(true);
            info!(attempt, session_id = ?session.session_id(), "Session re-established");
            self.logger.success(&format!(
                "Automation session re-established (attempt {}/{})",
                attempt, max_attempts
            ));
            return true;
        }

        self.slot.finish_reconnect(false);
        self.logger.error(&format!(
            "Reconnect budget exhausted after {} attempt(s); session needs re-initialisation",
            max_attempts
        ));
        false
    }

    fn attempt_failed(&self, attempt: u32, max_attempts: u32, error: &str) {
        self.slot.record_reconnect_attempt(Some(error));
        self.logger.warning(&format!(
            "Reconnect attempt {}/{} failed: {}",
            attempt, max_attempts, error
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::MemoryLogger;
    use crate::session::SessionPhase;
    use crate::testing::{fast_monitor_settings, FakeSession, FakeSessionFactory};
    use std::time::Duration;

    fn controller(factory: Arc<FakeSessionFactory>, attempts: u32) -> (Arc<ReconnectController>, Arc<SessionSlot>) {
        let settings = fast_monitor_settings(attempts);
        let slot = Arc::new(SessionSlot::new(settings.ping_timeout));
        let ctl = Arc::new(ReconnectController::new(
            slot.clone(),
            factory,
            settings,
            Arc::new(MemoryLogger::new()),
        ));
        (ctl, slot)
    }

    #[tokio::test]
    async fn test_reconnect_replaces_dead_session() {
        let factory = Arc::new(FakeSessionFactory::new());
        let (ctl, slot) = controller(factory.clone(), 3);
        let old = Arc::new(FakeSession::new("old"));
        old.set_location("app://search");
        slot.install(old.clone());

        assert!(ctl.reconnect().await);
        assert!(old.is_closed());
        assert_eq!(slot.phase(), SessionPhase::Alive);
        assert_eq!(slot.snapshot().reconnect_count, 1);
        assert_eq!(factory.created(), 1);
        let new_id = slot.session_id().unwrap();
        assert_ne!(new_id, "old");
        assert_eq!(
            factory.last_session().unwrap().restored_location().as_deref(),
            Some("app://search")
        );
    }

    #[tokio::test]
    async fn test_reconnect_retries_until_factory_succeeds() {
        let factory = Arc::new(FakeSessionFactory::new().failing_first(2));
        let (ctl, slot) = controller(factory.clone(), 5);

        assert!(ctl.reconnect().await);
        assert_eq!(factory.attempts(), 3);
        let state = slot.snapshot();
        assert_eq!(state.reconnect_attempts, 0);
        assert_eq!(state.total_failures, 2);
    }

    #[tokio::test]
    async fn test_invalid_new_session_is_discarded() {
        let factory = Arc::new(FakeSessionFactory::new().empty_ids_first(1));
        let (ctl, slot) = controller(factory.clone(), 3);

        assert!(ctl.reconnect().await);
        assert_eq!(factory.attempts(), 2);
        assert!(!slot.session_id().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_terminal() {
        let factory = Arc::new(FakeSessionFactory::new().always_failing());
        let (ctl, slot) = controller(factory.clone(), 3);

        assert!(!ctl.reconnect().await);
        assert_eq!(factory.attempts(), 3);
        assert_eq!(slot.phase(), SessionPhase::PermanentlyFailed);
        assert!(slot.current().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_triggers_share_one_procedure() {
        let factory = Arc::new(FakeSessionFactory::new().with_delay(Duration::from_millis(100)));
        let (ctl, _slot) = controller(factory.clone(), 3);

        let a = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.reconnect().await }
        });
        let b = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.reconnect().await }
        });

        assert!(a.await.unwrap());
        assert!(b.await.unwrap());
        assert_eq!(factory.attempts(), 1);
        assert_eq!(factory.max_concurrent(), 1);
        assert_eq!(ctl.generation(), 1);
    }

    #[tokio::test]
    async fn test_later_trigger_runs_fresh_procedure() {
        let factory = Arc::new(FakeSessionFactory::new());
        let (ctl, _slot) = controller(factory.clone(), 3);
        assert!(ctl.reconnect().await);
        assert!(ctl.reconnect().await);
        assert_eq!(factory.attempts(), 2);
        assert_eq!(ctl.generation(), 2);
    }
}
