//! Failure classification and the error handler's recovery loop

use proptest::prelude::*;
use sessionguard::observability::MemoryLogger;
use sessionguard::self_healing::{
    ErrorCategory, ErrorClassifier, ErrorHandler, Matcher, RecoveryStrategyRegistry,
};
use sessionguard::{GuardError, RetryConfig};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

proptest! {
    #[test]
    fn classify_is_a_pure_function(type_name in ".{0,24}", message in ".{0,120}") {
        let classifier = ErrorClassifier::default();
        let first = classifier.classify(&type_name, &message);
        for _ in 0..3 {
            prop_assert_eq!(classifier.classify(&type_name, &message), first);
        }
        // A second instance built from the same table agrees
        prop_assert_eq!(ErrorClassifier::default().classify(&type_name, &message), first);
    }

    #[test]
    fn refused_anywhere_in_text_is_network(prefix in "[a-z ]{0,20}", suffix in "[a-z ]{0,20}") {
        let message = format!("{}Connection Refused{}", prefix, suffix);
        // Session and timeout rules outrank network ones
        let lower = message.to_lowercase();
        prop_assume!(!lower.contains("time") && !lower.contains("deadline"));
        prop_assume!(!lower.contains("session"));
        let category = ErrorClassifier::default().classify("RuntimeError", &message);
        prop_assert_eq!(category, ErrorCategory::Network);
    }
}

#[test]
fn test_well_known_failures() {
    let c = ErrorClassifier::default();
    assert_eq!(
        c.classify("WebDriverException", "invalid session id"),
        ErrorCategory::SessionInvalid
    );
    assert_eq!(c.classify("TimeoutException", ""), ErrorCategory::Timeout);
    assert_eq!(
        c.classify("OSError", "[Errno 111] Connection refused"),
        ErrorCategory::Network
    );
    assert_eq!(c.classify("MemoryError", ""), ErrorCategory::ResourceExhaustion);
    assert_eq!(c.classify("ValueError", "bad literal"), ErrorCategory::Unknown);
}

#[test]
fn test_custom_rule_is_lowest_priority() {
    let mut c = ErrorClassifier::empty();
    c.push_rule(Matcher::Contains("Emulator Crashed".into()), ErrorCategory::Network);
    assert_eq!(c.classify("X", "the emulator crashed"), ErrorCategory::Network);
    assert_eq!(c.classify("X", "invalid session id"), ErrorCategory::Unknown);
}

fn handler(registry: Arc<RecoveryStrategyRegistry>) -> ErrorHandler {
    ErrorHandler::new(
        Arc::new(ErrorClassifier::default()),
        registry,
        RetryConfig::new(3, Duration::from_millis(1), 2.0),
        Arc::new(MemoryLogger::new()),
    )
}

#[tokio::test]
async fn test_recovery_succeeds_on_second_attempt() {
    let registry = Arc::new(RecoveryStrategyRegistry::new());
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    registry.register(ErrorCategory::Network, move || {
        let counter = counter.clone();
        async move { counter.fetch_add(1, Ordering::SeqCst) + 1 >= 2 }
    });
    let handler = handler(registry);

    let recovered = handler
        .handle(&GuardError::Network("connection reset".into()), "status poll", true, 3)
        .await;

    assert!(recovered);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let stats = handler.statistics();
    assert_eq!(stats.total_errors, 1);
    assert_eq!(stats.recovery_successes, 1);
    assert_eq!(handler.recent_errors(1)[0].recovery_attempts, 2);
}

#[tokio::test]
async fn test_exhausted_recovery_is_reported() {
    let registry = Arc::new(RecoveryStrategyRegistry::new());
    registry.register(ErrorCategory::Timeout, || async { false });
    let handler = handler(registry);

    let recovered = handler
        .handle(&GuardError::timeout("tap", 5), "tap login", true, 2)
        .await;

    assert!(!recovered);
    let stats = handler.statistics();
    assert_eq!(stats.recovery_failures, 1);
    assert_eq!(stats.by_category.get(&ErrorCategory::Timeout), Some(&1));
}

#[tokio::test]
async fn test_unregistered_category_is_unhandled() {
    let handler = handler(Arc::new(RecoveryStrategyRegistry::new()));
    let recovered = handler
        .handle(&GuardError::Internal("bad literal".into()), "parse", true, 3)
        .await;

    assert!(!recovered);
    let stats = handler.statistics();
    assert_eq!(stats.unhandled, 1);
    assert_eq!(stats.by_category.get(&ErrorCategory::Unknown), Some(&1));
}
