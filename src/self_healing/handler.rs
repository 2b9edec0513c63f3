use super::classifier::{ErrorCategory, ErrorClassifier};
use super::registry::RecoveryStrategyRegistry;
use crate::errors::GuardError;
use crate::observability::Logger;
use crate::strategy::RetryConfig;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Records kept in the in-memory history.
pub const MAX_ERROR_HISTORY: usize = 100;

/// One handled failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub category: ErrorCategory,
    pub type_name: String,
    pub message: String,
    pub context: String,
    pub timestamp: DateTime<Utc>,
    pub recovery_attempts: u32,
    pub recovered: bool,
}

/// Running totals for the life of the handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorStatistics {
    pub total_errors: u64,
    pub by_category: BTreeMap<ErrorCategory, u64>,
    pub recovery_successes: u64,
    pub recovery_failures: u64,
    /// Failures with no registered strategy or with recovery disabled
    pub unhandled: u64,
}

impl ErrorStatistics {
    pub fn recovery_rate(&self) -> f64 {
        let attempted = self.recovery_successes + self.recovery_failures;
        if attempted == 0 {
            0.0
        } else {
            self.recovery_successes as f64 / attempted as f64
        }
    }
}

pub struct ErrorHandler {
    classifier: Arc<ErrorClassifier>,
    registry: Arc<RecoveryStrategyRegistry>,
    retry: RetryConfig,
    stats: Mutex<ErrorStatistics>,
    history: Mutex<VecDeque<ErrorRecord>>,
    logger: Arc<dyn Logger>,
}

impl ErrorHandler {
    pub fn new(
        classifier: Arc<ErrorClassifier>,
        registry: Arc<RecoveryStrategyRegistry>,
        retry: RetryConfig,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            classifier,
            registry,
            retry,
            stats: Mutex::new(ErrorStatistics::default()),
            history: Mutex::new(VecDeque::with_capacity(MAX_ERROR_HISTORY)),
            logger,
        }
    }

    pub fn registry(&self) -> &Arc<RecoveryStrategyRegistry> {
        &self.registry
    }

    /// Classify, record and optionally recover from `error`.
    ///
    /// With `auto_recover` set and a strategy registered for the category,
    /// the strategy runs up to `max_attempts` times with exponential backoff,
    /// stopping at the first success. Returns whether the failure was
    /// recovered. Statistics are updated on every call.
    pub async fn handle(
        &self,
        error: &GuardError,
        context: &str,
        auto_recover: bool,
        max_attempts: u32,
    ) -> bool {
        let category = self.classifier.classify_error(error);
        let mut record = ErrorRecord {
            category,
            type_name: error.type_name().to_string(),
            message: error.message(),
            context: context.to_string(),
            timestamp: Utc::now(),
            recovery_attempts: 0,
            recovered: false,
        };

        self.logger.warning(&format!(
            "{} failure in {}: {}",
            category, context, record.message
        ));

        let strategy = if auto_recover {
            self.registry.lookup(category)
        } else {
            None
        };

        if let Some(strategy) = strategy {
            let attempts = max_attempts.max(1);
            for attempt in 1..=attempts {
                record.recovery_attempts = attempt;
                if strategy().await {
                    record.recovered = true;
                    break;
                }
                debug!(%category, attempt, "Recovery attempt failed");
                if attempt < attempts {
                    tokio::time::sleep(self.retry.delay_after(attempt)).await;
                }
            }

            if record.recovered {
                self.logger.success(&format!(
                    "Recovered from {} failure in {} after {} attempt(s)",
                    category, context, record.recovery_attempts
                ));
            } else {
                self.logger.error(&format!(
                    "Recovery for {} failure in {} exhausted {} attempt(s)",
                    category, context, attempts
                ));
            }
        } else if auto_recover {
            self.logger.error(&format!(
                "No recovery strategy registered for {} failure in {}",
                category, context
            ));
        }

        {
            let mut stats = self.stats.lock();
            stats.total_errors += 1;
            *stats.by_category.entry(category).or_insert(0) += 1;
            match (record.recovery_attempts > 0, record.recovered) {
                (true, true) => stats.recovery_successes += 1,
                (true, false) => stats.recovery_failures += 1,
                (false, _) => stats.unhandled += 1,
            }
        }

        let recovered = record.recovered;
        let mut history = self.history.lock();
        history.push_back(record);
        while history.len() > MAX_ERROR_HISTORY {
            history.pop_front();
        }
        recovered
    }

    /// `handle` with auto-recovery on and the configured attempt budget.
    pub async fn handle_default(&self, error: &GuardError, context: &str) -> bool {
        self.handle(error, context, true, self.retry.attempts()).await
    }

    /// Run `f`, routing a failure through `handle`.
    ///
    /// After a successful recovery `f` runs once more. A failed rerun is
    /// recorded without another recovery round. If the failure is not
    /// recovered or the rerun fails, the result is `fallback`, or the error
    /// when `raise_on_error` is set.
    pub async fn safe_execute<T, F, Fut>(
        &self,
        context: &str,
        f: F,
        fallback: T,
        raise_on_error: bool,
    ) -> Result<T, GuardError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, GuardError>>,
    {
        let error = match f().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let error = if self.handle_default(&error, context).await {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    self.handle(&e, context, false, 0).await;
                    e
                }
            }
        } else {
            error
        };

        if raise_on_error {
            Err(error)
        } else {
            Ok(fallback)
        }
    }

    pub fn statistics(&self) -> ErrorStatistics {
        self.stats.lock().clone()
    }

    /// Up to `n` most recent records, oldest first.
    pub fn recent_errors(&self, n: usize) -> Vec<ErrorRecord> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(n);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn reset_statistics(&self) {
        *self.stats.lock() = ErrorStatistics::default();
        self.history.lock().clear();
    }
}
