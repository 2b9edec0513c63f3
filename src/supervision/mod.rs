//! Session supervision and recovery
//!
//! The background [`SessionHealthMonitor`] and the mutex-guarded
//! [`ReconnectController`] it falls back to.

use crate::config::MonitorConfig;
use std::time::Duration;

pub mod health;
pub mod reconnect;

pub use health::SessionHealthMonitor;
pub use reconnect::ReconnectController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// `base * min(2^(attempt-1), cap)`
    Exponential { base: Duration, cap: u64 },
    Fixed(Duration),
}

impl BackoffStrategy {
    /// Delay before the 1-based `attempt`. The first attempt never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        match self {
            Self::Exponential { base, cap } => {
                let factor = 1u64
                    .checked_shl(attempt - 1)
                    .unwrap_or(u64::MAX)
                    .min(*cap);
                base.saturating_mul(u32::try_from(factor).unwrap_or(u32::MAX))
            }
            Self::Fixed(delay) => *delay,
        }
    }
}

/// Runtime form of `[monitor]`, with durations resolved.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub health_check_interval: Duration,
    pub max_reconnect_attempts: u32,
    /// Bound on each session-factory call
    pub reconnect_timeout: Duration,
    pub backoff: BackoffStrategy,
    pub shutdown_join_timeout: Duration,
    /// Bound on pings and teardown calls
    pub ping_timeout: Duration,
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            health_check_interval: config.health_check_interval(),
            max_reconnect_attempts: config.max_reconnect_attempts,
            reconnect_timeout: config.reconnect_timeout(),
            backoff: BackoffStrategy::Exponential {
                base: Duration::from_secs(1),
                cap: config.backoff_cap_secs,
            },
            shutdown_join_timeout: config.shutdown_join_timeout(),
            ping_timeout: config.ping_timeout(),
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}
