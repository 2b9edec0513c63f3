//! Operator-facing log capability.
//!
//! Components report progress that a human (or the GUI collaborator) should
//! see through this fixed four-method interface. Internal diagnostics go
//! straight to `tracing`.

use colored::Colorize;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

pub trait Logger: Send + Sync {
    fn info(&self, message: &str);
    fn warning(&self, message: &str);
    fn error(&self, message: &str);
    fn success(&self, message: &str);

    /// Dispatch on a level value instead of a method name.
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => self.info(message),
            LogLevel::Warning => self.warning(message),
            LogLevel::Error => self.error(message),
            LogLevel::Success => self.success(message),
        }
    }
}

/// Forwards to the global `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn warning(&self, message: &str) {
        tracing::warn!("{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!("{}", message);
    }

    fn success(&self, message: &str) {
        tracing::info!(outcome = "success", "{}", message);
    }
}

/// Prints glyph-prefixed lines to stderr for interactive use.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn info(&self, message: &str) {
        eprintln!("{} {}", "·".dimmed(), message);
    }

    fn warning(&self, message: &str) {
        eprintln!("{} {}", "!".yellow().bold(), message);
        tracing::warn!("{}", message);
    }

    fn error(&self, message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message);
        tracing::error!("{}", message);
    }

    fn success(&self, message: &str) {
        eprintln!("{} {}", "✓".green().bold(), message);
    }
}

/// Captures lines in memory; used by tests and by collaborators that render
/// their own log view.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines.lock().clone()
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.lines.lock().iter().filter(|(l, _)| *l == level).count()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|(_, m)| m.contains(needle))
    }

    fn push(&self, level: LogLevel, message: &str) {
        self.lines.lock().push((level, message.to_string()));
    }
}

impl Logger for MemoryLogger {
    fn info(&self, message: &str) {
        self.push(LogLevel::Info, message);
    }

    fn warning(&self, message: &str) {
        self.push(LogLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.push(LogLevel::Error, message);
    }

    fn success(&self, message: &str) {
        self.push(LogLevel::Success, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_logger_records_levels() {
        let logger = MemoryLogger::new();
        logger.info("starting");
        logger.warning("slow");
        logger.log(LogLevel::Error, "broken");
        logger.log(LogLevel::Success, "fixed");

        let lines = logger.lines();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[2], (LogLevel::Error, "broken".to_string()));
        assert_eq!(logger.count(LogLevel::Success), 1);
        assert!(logger.contains("slow"));
        assert!(!logger.contains("missing"));
    }

    #[test]
    fn test_tracing_logger_does_not_panic() {
        let logger = TracingLogger;
        logger.info("info");
        logger.warning("warning");
        logger.error("error");
        logger.success("success");
    }

    #[test]
    fn test_log_level_serde() {
        let json = serde_json::to_string(&LogLevel::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
    }
}
