//! Testing module
//!
//! Stand-ins for the external collaborators, used by unit and integration
//! tests and by anyone embedding the subsystem in their own test suite:
//! - Mock automation server
//! - Scripted device bridge
//! - In-memory sessions and session factory
//! - Fixed host sampler and a launcher for the mock server
//!
//! Compiled for the crate's own tests, and for everyone else behind the
//! `testing` feature.

pub mod bridge;
pub mod host;
pub mod mock_server;
pub mod session;

pub use bridge::FakeBridge;
pub use host::{FakeLauncher, StaticSampler};
pub use mock_server::{MockStatusServer, MockStatusServerBuilder};
pub use session::{FakeSession, FakeSessionFactory};

use crate::supervision::{BackoffStrategy, MonitorSettings};
use std::time::Duration;

/// A loopback port with nothing listening on it at the time of the call.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .unwrap_or(1)
}

/// Monitor settings with millisecond-scale intervals and backoff.
pub fn fast_monitor_settings(max_reconnect_attempts: u32) -> MonitorSettings {
    MonitorSettings {
        health_check_interval: Duration::from_millis(20),
        max_reconnect_attempts,
        reconnect_timeout: Duration::from_secs(2),
        backoff: BackoffStrategy::Exponential {
            base: Duration::from_millis(1),
            cap: 10,
        },
        shutdown_join_timeout: Duration::from_secs(2),
        ping_timeout: Duration::from_millis(500),
    }
}
