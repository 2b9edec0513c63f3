//! Multi-strategy execution through the assembled guard

use proptest::prelude::*;
use sessionguard::{GuardError, MemoryLogger, MultiStrategyExecutor, RetryConfig, Strategy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::helpers::{build_guard, fast_config};

fn failing(id: &str) -> Strategy<&'static str> {
    let id_owned = id.to_string();
    Strategy::new(id, move || {
        let id = id_owned.clone();
        async move { Err(GuardError::Internal(format!("{} cannot find the element", id))) }
    })
}

#[tokio::test]
async fn test_fallthrough_to_third_strategy() {
    let t = build_guard(fast_config("http://127.0.0.1:4723", None), None);
    let strategies = vec![
        failing("by_accessibility_id"),
        failing("by_xpath"),
        Strategy::new("by_coordinates", || async { Ok("tapped") }),
    ];

    let result = t.guard.execute(&strategies, "tap search").await;

    assert!(result.success);
    assert_eq!(result.strategy_identifier.as_deref(), Some("by_coordinates"));
    assert_eq!(result.value, Some("tapped"));
    assert_eq!(result.failures.len(), 2);

    let stats = t.guard.executor().statistics();
    assert_eq!(stats["by_accessibility_id"].failures, 1);
    assert_eq!(stats["by_xpath"].failures, 1);
    assert_eq!(stats["by_coordinates"].successes, 1);
    assert_eq!(stats["by_coordinates"].failures, 0);
}

#[tokio::test]
async fn test_per_strategy_retry_overrides_default() {
    let executor = MultiStrategyExecutor::new(RetryConfig::once(), Arc::new(MemoryLogger::new()));
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let flaky = Strategy::new("flaky", move || {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(GuardError::Network("connection reset".into()))
            } else {
                Ok(())
            }
        }
    })
    .with_retry(RetryConfig::new(3, Duration::from_millis(1), 2.0));

    let result = executor.execute(&[flaky], "open menu").await;
    assert!(result.success);
    assert_eq!(result.retry_count, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_all_failing_aggregates_errors() {
    let executor = MultiStrategyExecutor::new(RetryConfig::once(), Arc::new(MemoryLogger::new()));
    let result = executor
        .execute(&[failing("a"), failing("b")], "swipe")
        .await;

    assert!(!result.success);
    assert_eq!(result.strategy_identifier.as_deref(), Some("b"));
    let message = result.error_message.unwrap();
    assert!(message.contains("a cannot find"));
    assert!(message.contains("b cannot find"));

    executor.reset_statistics();
    assert_eq!(executor.report(), "No strategies executed");
}

proptest! {
    #[test]
    fn retry_delays_never_shrink(
        initial in 0u64..5_000,
        factor in 1.0f64..4.0,
        attempt in 1u32..20,
    ) {
        let retry = RetryConfig::new(5, Duration::from_millis(initial), factor);
        prop_assert!(retry.delay_after(attempt + 1) >= retry.delay_after(attempt));
        prop_assert_eq!(retry.delay_after(1), Duration::from_millis(initial));
    }
}
