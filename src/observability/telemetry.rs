//! Telemetry & Observability
//!
//! Structured logging setup and span helpers for the subsystem.
//! Features:
//! - Operation spans with timing and outcome
//! - Session phase transition logging
//! - Configurable log levels via RUST_LOG
//! - Optional daily-rolling log file for unattended runs

use std::path::Path;
use std::sync::Once;
use std::time::Instant;
use tracing::{error, info, info_span};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Sanitize a string for safe log output by escaping control characters.
/// Bridge tool output is echoed into logs and may carry stray `\r` or ANSI
/// escapes.
pub fn sanitize_for_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x1b' => out.push_str("\\e"),
            '\x00' => out.push_str("\\0"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            _ => out.push(c),
        }
    }
    out
}

/// Initialize global tracing subscriber.
/// Only enables tracing if RUST_LOG is explicitly set, keeping CLI output
/// clean otherwise.
pub fn init_tracing() {
    if let Ok(filter) = std::env::var("RUST_LOG") {
        init_tracing_with_filter(&filter);
    }
}

/// Initialize tracing for verbose mode
pub fn init_tracing_verbose() {
    init_tracing_with_filter("sessionguard=debug,info")
}

/// Initialize with custom filter string
pub fn init_tracing_with_filter(filter: &str) {
    INIT.call_once(|| {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .compact()
            .with_writer(std::io::stderr);

        let filter_layer = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));

        let _ = tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init();
    });
}

/// Initialize tracing with an additional daily-rolling file in `log_dir`.
///
/// The returned guard flushes the background writer on drop and must be kept
/// alive for the lifetime of the process.
pub fn init_tracing_with_file(filter: &str, log_dir: &Path) -> Option<WorkerGuard> {
    let mut guard = None;
    INIT.call_once(|| {
        let appender = tracing_appender::rolling::daily(log_dir, "sessionguard.log");
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer);

        let filter_layer = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = tracing_subscriber::registry()
            .with(filter_layer)
            .with(stderr_layer)
            .with(file_layer)
            .try_init();
        guard = Some(worker_guard);
    });
    guard
}

/// Run `f` inside an `operation` span, logging duration and outcome.
pub async fn track_operation<F, Fut, T, E>(operation: &str, f: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let safe_name = sanitize_for_log(operation);
    let span = info_span!(
        "operation",
        name = safe_name.as_str(),
        duration_ms = tracing::field::Empty,
        success = tracing::field::Empty,
    );

    let result = f().await;
    let duration = start.elapsed().as_millis() as u64;
    span.record("duration_ms", duration);

    match &result {
        Ok(_) => {
            span.record("success", true);
            span.in_scope(|| tracing::debug!(duration_ms = duration, "Operation completed"));
        }
        Err(e) => {
            let safe_err = sanitize_for_log(&e.to_string());
            span.record("success", false);
            span.in_scope(|| {
                error!(
                    duration_ms = duration,
                    error = safe_err.as_str(),
                    "Operation failed"
                )
            });
        }
    }
    result
}

/// Record a session phase transition
pub fn record_state_transition(from: &str, to: &str) {
    if from == to {
        return;
    }
    info!(
        from = sanitize_for_log(from).as_str(),
        to = sanitize_for_log(to).as_str(),
        "Session phase transition"
    );
}

/// Initialize tracing for tests with a simple subscriber
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_for_log_newlines() {
        assert_eq!(
            sanitize_for_log("List of devices\r\n127.0.0.1:5555\tdevice"),
            "List of devices\\r\\n127.0.0.1:5555\\tdevice"
        );
    }

    #[test]
    fn test_sanitize_for_log_escapes_ansi() {
        assert_eq!(sanitize_for_log("\x1b[31mred"), "\\e[31mred");
        assert_eq!(sanitize_for_log("\x07bell"), "\\u0007bell");
    }

    #[test]
    fn test_sanitize_for_log_preserves_unicode() {
        assert_eq!(sanitize_for_log("设备 ok"), "设备 ok");
    }

    #[tokio::test]
    async fn test_track_operation_success() {
        init_test_tracing();
        let result: Result<i32, String> = track_operation("bridge.devices", || async { Ok(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_track_operation_failure_preserves_error() {
        let result: Result<i32, String> =
            track_operation("bridge.connect", || async { Err("refused\n".to_string()) }).await;
        assert_eq!(result.unwrap_err(), "refused\n");
    }

    #[test]
    fn test_record_state_transition_does_not_panic() {
        record_state_transition("Alive", "Failed");
        record_state_transition("Alive", "Alive");
    }
}
