//! In-memory automation sessions and a scriptable session factory.

use crate::errors::GuardError;
use crate::session::{AutomationSession, SessionFactory};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct FakeSessionState {
    ping_error: Option<GuardError>,
    ping_delay: Option<Duration>,
    location: Option<String>,
    restored: Option<String>,
}

#[derive(Debug)]
pub struct FakeSession {
    id: String,
    closed: AtomicBool,
    state: Mutex<FakeSessionState>,
}

impl FakeSession {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            closed: AtomicBool::new(false),
            state: Mutex::new(FakeSessionState::default()),
        }
    }

    /// Every later ping returns `error`.
    pub fn fail_pings_with(&self, error: GuardError) {
        self.state.lock().ping_error = Some(error);
    }

    /// Every later ping sleeps `delay` before answering.
    pub fn hang_pings(&self, delay: Duration) {
        self.state.lock().ping_delay = Some(delay);
    }

    pub fn set_location(&self, location: &str) {
        self.state.lock().location = Some(location.to_string());
    }

    pub fn restored_location(&self) -> Option<String> {
        self.state.lock().restored.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AutomationSession for FakeSession {
    fn session_id(&self) -> Option<String> {
        Some(self.id.clone())
    }

    async fn ping(&self) -> Result<(), GuardError> {
        let delay = self.state.lock().ping_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.is_closed() {
            return Err(GuardError::SessionInvalid(format!("session {} was closed", self.id)));
        }
        match &self.state.lock().ping_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn current_location(&self) -> Option<String> {
        self.state.lock().location.clone()
    }

    async fn restore_location(&self, location: &str) -> Result<(), GuardError> {
        let mut state = self.state.lock();
        state.restored = Some(location.to_string());
        state.location = Some(location.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), GuardError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Builds [`FakeSession`]s, optionally failing or stalling on the way.
#[derive(Debug, Default)]
pub struct FakeSessionFactory {
    fail_first: u32,
    empty_first: u32,
    always_fail: bool,
    delay: Option<Duration>,
    attempts: AtomicU32,
    created: AtomicUsize,
    in_flight: AtomicUsize,
    max_concurrent: AtomicUsize,
    last: Mutex<Option<Arc<FakeSession>>>,
}

impl FakeSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `n` calls fail with a network error.
    pub fn failing_first(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }

    /// The first `n` sessions come back with an empty identifier.
    pub fn empty_ids_first(mut self, n: u32) -> Self {
        self.empty_first = n;
        self
    }

    pub fn always_failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Every call takes `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls to `create`, successful or not.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Sessions handed out.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Highest number of `create` calls observed running at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    pub fn last_session(&self) -> Option<Arc<FakeSession>> {
        self.last.lock().clone()
    }

    async fn build(&self, attempt: u32) -> Result<Arc<FakeSession>, GuardError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.always_fail || attempt <= self.fail_first {
            return Err(GuardError::Network(format!(
                "connection refused (attempt {})",
                attempt
            )));
        }
        let id = if attempt <= self.fail_first + self.empty_first {
            String::new()
        } else {
            format!("fake-session-{}", attempt)
        };
        Ok(Arc::new(FakeSession::new(&id)))
    }
}

#[async_trait]
impl SessionFactory for FakeSessionFactory {
    async fn create(&self) -> Result<Arc<dyn AutomationSession>, GuardError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(running, Ordering::SeqCst);

        let result = self.build(attempt).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let session = result?;
        self.created.fetch_add(1, Ordering::SeqCst);
        *self.last.lock() = Some(session.clone());
        Ok(session)
    }
}
