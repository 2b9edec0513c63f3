//! Observability module
//!
//! - Tracing subscriber setup and operation spans
//! - Operator-facing `Logger` capability

pub mod logger;
pub mod telemetry;

pub use logger::{ConsoleLogger, LogLevel, Logger, MemoryLogger, TracingLogger};
