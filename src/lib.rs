//! sessionguard - keeps an unattended device-automation run alive
//!
//! Watches the automation session and its two external dependencies (the
//! device bridge tool and the automation server), classifies failures into
//! actionable categories, and repairs what it can with bounded retries.
//!
//! - **Bridge**: device list parsing, connect/disconnect, zombie cleanup
//! - **Supervision**: background liveness monitor and serialized reconnect
//! - **Self-healing**: failure classifier, recovery registry, error handler
//! - **Diagnostics**: severity-ranked probe battery and auto-repair
//! - **Strategy**: multi-strategy executor with per-strategy retries
//!
//! # Quick Start
//!
//! ```ignore
//! use sessionguard::{Config, SessionGuard, TracingLogger};
//!
//! let guard = SessionGuard::from_config(Config::load(None)?, Arc::new(TracingLogger))?;
//! let cycle = guard.diagnose_and_repair().await;
//! println!("{}", cycle.latest().render_text());
//! ```

pub mod bridge;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod guard;
pub mod observability;
pub mod probe;
pub mod resource;
pub mod self_healing;
pub mod server;
pub mod session;
pub mod strategy;
pub mod supervision;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::Config;
pub use diagnostics::{AutoRepairEngine, DiagnosticIssue, DiagnosticReport, DiagnosticsEngine};
pub use errors::GuardError;
pub use guard::{Collaborators, SessionGuard};
pub use observability::{Logger, MemoryLogger, TracingLogger};
pub use strategy::{MultiStrategyExecutor, RetryConfig, Strategy, StrategyResult};
pub use supervision::SessionHealthMonitor;
