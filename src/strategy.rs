//! Multi-strategy execution
//!
//! Runs an ordered list of alternative implementations of the same intent
//! ("click this target", "open this screen") until one succeeds. Each
//! strategy gets its own bounded retry loop with exponential backoff between
//! its internal attempts; there is no delay between strategies.
//!
//! Per-identifier success/failure tallies live for the life of the executor
//! so callers can see which alternatives actually carry the load.

use crate::errors::GuardError;
use crate::observability::logger::Logger;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

// ============================================================================
// Retry configuration
// ============================================================================

/// Retry schedule for one strategy or one recovery callback.
///
/// `max_retries` is the total number of attempts (at least one attempt is
/// always made). The delay before attempt `n + 1` is
/// `initial_delay * backoff_factor^(n - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            initial_delay_ms: initial_delay.as_millis() as u64,
            backoff_factor,
        }
    }

    /// A single attempt with no retry.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.backoff_factor.max(1.0).powi(attempt as i32 - 1);
        let millis = (self.initial_delay_ms as f64 * factor).min(u64::MAX as f64 / 2.0);
        Duration::from_millis(millis as u64)
    }
}

// ============================================================================
// Strategies
// ============================================================================

pub type StrategyFn<T> =
    Box<dyn Fn() -> BoxFuture<'static, Result<T, GuardError>> + Send + Sync>;

/// One alternative implementation of a logical action.
pub struct Strategy<T = ()> {
    id: String,
    retry: Option<RetryConfig>,
    action: StrategyFn<T>,
}

impl<T: Send + 'static> Strategy<T> {
    pub fn new<F, Fut>(id: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<T, GuardError>> + Send + 'static,
    {
        Self {
            id: id.into(),
            retry: None,
            action: Box::new(move || Box::pin(action())),
        }
    }

    /// Override the executor's default retry schedule for this strategy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T> std::fmt::Debug for Strategy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy")
            .field("id", &self.id)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Outcome of an `execute` call.
#[derive(Debug, Clone)]
pub struct StrategyResult<T = ()> {
    pub success: bool,
    /// Identifier of the strategy that succeeded, or of the last one tried
    pub strategy_identifier: Option<String>,
    /// Failure text; for an aggregate failure, every strategy's last error
    pub error_message: Option<String>,
    /// Attempts made by the reported strategy beyond its first
    pub retry_count: u32,
    pub elapsed_time: Duration,
    pub value: Option<T>,
    /// `(identifier, last error)` for every strategy that exhausted
    pub failures: Vec<(String, String)>,
}

/// Success/failure counters for one strategy identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyTally {
    pub successes: u64,
    pub failures: u64,
}

impl StrategyTally {
    pub fn success_rate(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            0.0
        } else {
            self.successes as f64 / total as f64
        }
    }
}

/// Executes strategies in priority order.
pub struct MultiStrategyExecutor {
    default_retry: RetryConfig,
    stats: Mutex<BTreeMap<String, StrategyTally>>,
    logger: Arc<dyn Logger>,
}

impl MultiStrategyExecutor {
    pub fn new(default_retry: RetryConfig, logger: Arc<dyn Logger>) -> Self {
        Self {
            default_retry,
            stats: Mutex::new(BTreeMap::new()),
            logger,
        }
    }

    /// Try each strategy in order until one succeeds.
    pub async fn execute<T: Send + 'static>(
        &self,
        strategies: &[Strategy<T>],
        task_name: &str,
    ) -> StrategyResult<T> {
        let started = Instant::now();
        let mut failures = Vec::new();
        let mut last_retry_count = 0;

        for strategy in strategies {
            let retry = strategy.retry.unwrap_or(self.default_retry);
            let attempts = retry.attempts();
            let mut last_error = None;

            for attempt in 1..=attempts {
                match (strategy.action)().await {
                    Ok(value) => {
                        self.record(&strategy.id, true);
                        self.logger.success(&format!(
                            "{}: strategy '{}' succeeded (attempt {}/{})",
                            task_name, strategy.id, attempt, attempts
                        ));
                        return StrategyResult {
                            success: true,
                            strategy_identifier: Some(strategy.id.clone()),
                            error_message: None,
                            retry_count: attempt - 1,
                            elapsed_time: started.elapsed(),
                            value: Some(value),
                            failures,
                        };
                    }
                    Err(e) => {
                        debug!(
                            task = task_name,
                            strategy = %strategy.id,
                            attempt,
                            error = %e,
                            "Strategy attempt failed"
                        );
                        last_error = Some(e.to_string());
                        if attempt < attempts {
                            tokio::time::sleep(retry.delay_after(attempt)).await;
                        }
                    }
                }
            }

            self.record(&strategy.id, false);
            let message = last_error.unwrap_or_else(|| "no attempt made".to_string());
            self.logger.warning(&format!(
                "{}: strategy '{}' exhausted {} attempt(s): {}",
                task_name, strategy.id, attempts, message
            ));
            failures.push((strategy.id.clone(), message));
            last_retry_count = attempts - 1;
        }

        let error_message = if failures.is_empty() {
            format!("{}: no strategies supplied", task_name)
        } else {
            failures
                .iter()
                .map(|(id, err)| format!("{}: {}", id, err))
                .collect::<Vec<_>>()
                .join("; ")
        };
        self.logger
            .error(&format!("{}: all strategies failed ({})", task_name, error_message));

        StrategyResult {
            success: false,
            strategy_identifier: failures.last().map(|(id, _)| id.clone()),
            error_message: Some(error_message),
            retry_count: last_retry_count,
            elapsed_time: started.elapsed(),
            value: None,
            failures,
        }
    }

    fn record(&self, id: &str, success: bool) {
        let mut stats = self.stats.lock();
        let tally = stats.entry(id.to_string()).or_default();
        if success {
            tally.successes += 1;
        } else {
            tally.failures += 1;
        }
    }

    /// Per-identifier tallies, sorted by identifier.
    pub fn statistics(&self) -> BTreeMap<String, StrategyTally> {
        self.stats.lock().clone()
    }

    /// Human-readable tally table.
    pub fn report(&self) -> String {
        let stats = self.stats.lock();
        if stats.is_empty() {
            return "No strategies executed".to_string();
        }
        let mut out = String::new();
        for (id, tally) in stats.iter() {
            out.push_str(&format!(
                "{:<32} ok={:<4} fail={:<4} rate={:.0}%\n",
                id,
                tally.successes,
                tally.failures,
                tally.success_rate() * 100.0
            ));
        }
        out
    }

    pub fn reset_statistics(&self) {
        self.stats.lock().clear();
    }
}
