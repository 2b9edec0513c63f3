//! Automation session handle and liveness state
//!
//! [`SessionSlot`] is the one piece of state shared between the background
//! monitor and foreground callers: the live session handle plus its
//! [`SessionState`]. All state transitions go through its check and mark
//! operations.

pub mod webdriver;

use crate::errors::GuardError;
use crate::observability::telemetry::record_state_transition;
use crate::self_healing::classifier::{ErrorCategory, ErrorClassifier};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// A live automation session. Opaque beyond its identifier and one cheap
/// liveness call.
#[async_trait]
pub trait AutomationSession: Send + Sync {
    fn session_id(&self) -> Option<String>;

    /// One cheap round trip against the server.
    async fn ping(&self) -> Result<(), GuardError>;

    /// Logical location worth restoring after a reconnect, if the session
    /// exposes one.
    async fn current_location(&self) -> Option<String> {
        None
    }

    /// Navigate back to a location captured by `current_location`.
    async fn restore_location(&self, _location: &str) -> Result<(), GuardError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), GuardError>;
}

/// Produces fresh sessions on demand.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn AutomationSession>, GuardError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Uninitialized,
    Alive,
    Failed,
    Reconnecting,
    /// Reconnect budget exhausted; needs external re-initialisation
    PermanentlyFailed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Alive => "alive",
            Self::Failed => "failed",
            Self::Reconnecting => "reconnecting",
            Self::PermanentlyFailed => "permanently_failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub is_alive: bool,
    pub last_check_time: Option<Instant>,
    /// Successful reconnects over the slot's lifetime
    pub reconnect_count: u32,
    /// Attempts spent in the current reconnect episode
    pub reconnect_attempts: u32,
    pub total_failures: u32,
    pub last_error: Option<String>,
    pub session_start_time: Option<Instant>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Uninitialized,
            is_alive: false,
            last_check_time: None,
            reconnect_count: 0,
            reconnect_attempts: 0,
            total_failures: 0,
            last_error: None,
            session_start_time: None,
        }
    }
}

/// Snapshot handed to collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub alive: bool,
    pub phase: SessionPhase,
    pub session_id: Option<String>,
    pub reconnect_count: u32,
    pub total_failures: u32,
    pub last_error: Option<String>,
    pub uptime_secs: Option<u64>,
    pub last_check_age_ms: Option<u64>,
}

enum Verdict {
    Healthy,
    Transient(GuardError),
    Failed(String),
}

/// Shared owner of the session handle and its state.
pub struct SessionSlot {
    state: Mutex<SessionState>,
    session: RwLock<Option<Arc<dyn AutomationSession>>>,
    classifier: ErrorClassifier,
    ping_timeout: Duration,
    liveness_window: Duration,
}

impl SessionSlot {
    pub fn new(ping_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            session: RwLock::new(None),
            classifier: ErrorClassifier::default(),
            ping_timeout,
            liveness_window: Duration::MAX,
        }
    }

    /// Bound how long a transient ping error may ride on the last
    /// successful check. Normally the health-check interval.
    pub fn with_liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    /// Current session handle, cloned out so no lock is held across awaits.
    pub fn current(&self) -> Option<Arc<dyn AutomationSession>> {
        self.session.read().clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.current().and_then(|s| s.session_id())
    }

    /// Replace the held session, returning the previous one.
    pub fn install(&self, session: Arc<dyn AutomationSession>) -> Option<Arc<dyn AutomationSession>> {
        self.session.write().replace(session)
    }

    pub fn take(&self) -> Option<Arc<dyn AutomationSession>> {
        self.session.write().take()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.lock().clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.lock().phase
    }

    fn set_phase(state: &mut SessionState, phase: SessionPhase) {
        let from = state.phase;
        state.phase = phase;
        record_state_transition(&from.to_string(), &phase.to_string());
    }

    /// Validate the held session.
    ///
    /// Quick mode only checks for a non-empty identifier. Full mode also
    /// pings under the ping timeout. Network, timeout and invalid-session
    /// failures mark the slot failed. Any other ping error is transient and
    /// leaves the state untouched while the last successful check is inside
    /// the liveness window; once that check goes stale it counts as a
    /// failure.
    pub async fn check_health(&self, quick: bool) -> bool {
        match self.evaluate(quick).await {
            Verdict::Healthy => {
                self.record_success();
                true
            }
            Verdict::Transient(e) if self.is_alive(self.liveness_window) => {
                debug!(error = %e, "Transient session error ignored");
                true
            }
            Verdict::Transient(e) => {
                self.mark_failed(&e.to_string());
                false
            }
            Verdict::Failed(reason) => {
                self.mark_failed(&reason);
                false
            }
        }
    }

    /// Full check that records nothing. `Err` carries the reason the
    /// session would be marked failed.
    pub async fn inspect(&self) -> Result<(), String> {
        match self.evaluate(false).await {
            Verdict::Healthy => Ok(()),
            Verdict::Transient(_) if self.is_alive(self.liveness_window) => Ok(()),
            Verdict::Transient(e) => Err(e.to_string()),
            Verdict::Failed(reason) => Err(reason),
        }
    }

    async fn evaluate(&self, quick: bool) -> Verdict {
        let session = self.current();
        let has_id = session
            .as_ref()
            .and_then(|s| s.session_id())
            .is_some_and(|id| !id.trim().is_empty());

        let session = match session {
            Some(session) if has_id => session,
            _ => return Verdict::Failed("session identifier is empty".to_string()),
        };

        if quick {
            return Verdict::Healthy;
        }

        match tokio::time::timeout(self.ping_timeout, session.ping()).await {
            Ok(Ok(())) => Verdict::Healthy,
            Ok(Err(e)) if self.is_fatal(&e) => Verdict::Failed(e.to_string()),
            Ok(Err(e)) => Verdict::Transient(e),
            Err(_) => Verdict::Failed(
                GuardError::timeout("session ping", self.ping_timeout.as_secs()).to_string(),
            ),
        }
    }

    fn is_fatal(&self, error: &GuardError) -> bool {
        matches!(
            self.classifier.classify_error(error),
            ErrorCategory::SessionInvalid | ErrorCategory::Network | ErrorCategory::Timeout
        )
    }

    fn record_success(&self) {
        let mut state = self.state.lock();
        state.last_check_time = Some(Instant::now());
        state.is_alive = true;
        if matches!(state.phase, SessionPhase::Uninitialized | SessionPhase::Failed) {
            Self::set_phase(&mut state, SessionPhase::Alive);
        }
    }

    /// Record a failure. A slot that is reconnecting or permanently failed
    /// keeps its phase.
    pub fn mark_failed(&self, error: &str) {
        let mut state = self.state.lock();
        state.is_alive = false;
        state.total_failures += 1;
        state.last_error = Some(error.to_string());
        if !matches!(
            state.phase,
            SessionPhase::Reconnecting | SessionPhase::PermanentlyFailed
        ) {
            Self::set_phase(&mut state, SessionPhase::Failed);
        }
    }

    /// Record a freshly validated session.
    pub fn mark_alive(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.is_alive = true;
        state.last_check_time = Some(now);
        state.session_start_time = Some(now);
        state.last_error = None;
        Self::set_phase(&mut state, SessionPhase::Alive);
    }

    pub(crate) fn begin_reconnect(&self) {
        let mut state = self.state.lock();
        state.is_alive = false;
        state.reconnect_attempts = 0;
        Self::set_phase(&mut state, SessionPhase::Reconnecting);
    }

    pub(crate) fn record_reconnect_attempt(&self, error: Option<&str>) {
        let mut state = self.state.lock();
        state.reconnect_attempts += 1;
        if let Some(error) = error {
            state.total_failures += 1;
            state.last_error = Some(error.to_string());
        }
    }

    pub(crate) fn finish_reconnect(&self, success: bool) {
        if success {
            self.mark_alive();
            let mut state = self.state.lock();
            state.reconnect_count += 1;
            state.reconnect_attempts = 0;
        } else {
            let mut state = self.state.lock();
            state.is_alive = false;
            Self::set_phase(&mut state, SessionPhase::PermanentlyFailed);
        }
    }

    /// Liveness requires a successful check within `interval` of now.
    pub fn is_alive(&self, interval: Duration) -> bool {
        let state = self.state.lock();
        state.is_alive
            && state.phase == SessionPhase::Alive
            && state
                .last_check_time
                .is_some_and(|t| t.elapsed() <= interval)
    }

    pub fn report(&self, interval: Duration) -> HealthReport {
        let alive = self.is_alive(interval);
        let session_id = self.session_id();
        let state = self.state.lock();
        HealthReport {
            alive,
            phase: state.phase,
            session_id,
            reconnect_count: state.reconnect_count,
            total_failures: state.total_failures,
            last_error: state.last_error.clone(),
            uptime_secs: state.session_start_time.map(|t| t.elapsed().as_secs()),
            last_check_age_ms: state
                .last_check_time
                .map(|t| t.elapsed().as_millis() as u64),
        }
    }
}

impl std::fmt::Debug for SessionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSlot")
            .field("state", &*self.state.lock())
            .field("session_id", &self.session_id())
            .finish()
    }
}
