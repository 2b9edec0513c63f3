//! Session slot, reconnect serialization and backoff

use proptest::prelude::*;
use sessionguard::session::{SessionPhase, SessionSlot};
use sessionguard::supervision::{BackoffStrategy, SessionHealthMonitor};
use sessionguard::testing::{fast_monitor_settings, FakeSession, FakeSessionFactory};
use sessionguard::{GuardError, MemoryLogger};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::helpers::{build_guard, fast_config};

fn seconds_backoff(cap: u64) -> BackoffStrategy {
    BackoffStrategy::Exponential {
        base: Duration::from_secs(1),
        cap,
    }
}

#[test]
fn test_backoff_schedule_with_cap_ten() {
    let backoff = seconds_backoff(10);
    let delays: Vec<u64> = (1..=6).map(|n| backoff.delay_before(n).as_secs()).collect();
    assert_eq!(delays, vec![0, 2, 4, 8, 10, 10]);
}

proptest! {
    #[test]
    fn backoff_matches_capped_power_of_two(attempt in 2u32..200, cap in 1u64..600) {
        let expected = 2u64.checked_pow(attempt - 1).unwrap_or(u64::MAX).min(cap);
        prop_assert_eq!(seconds_backoff(cap).delay_before(attempt).as_secs(), expected);
    }
}

#[test]
fn test_quick_check_rejects_empty_identifier() {
    tokio_test::block_on(async {
        let slot = SessionSlot::new(Duration::from_millis(200));
        slot.install(Arc::new(FakeSession::new("")));

        assert!(!slot.check_health(true).await);
        let state = slot.snapshot();
        assert_eq!(state.phase, SessionPhase::Failed);
        assert!(!state.is_alive);
        assert!(state.last_error.is_some_and(|e| !e.is_empty()));
    });
}

#[tokio::test]
async fn test_quick_check_without_session_fails() {
    let slot = SessionSlot::new(Duration::from_millis(200));
    assert!(!slot.check_health(true).await);
    assert_eq!(slot.phase(), SessionPhase::Failed);
}

#[tokio::test]
async fn test_concurrent_reconnects_run_one_procedure() {
    let factory = Arc::new(FakeSessionFactory::new().with_delay(Duration::from_millis(100)));
    let monitor = SessionHealthMonitor::new(
        factory.clone(),
        fast_monitor_settings(3),
        Arc::new(MemoryLogger::new()),
    );

    let (first, second) = tokio::join!(monitor.reconnect(), monitor.reconnect());

    assert!(first && second);
    assert_eq!(factory.attempts(), 1);
    assert_eq!(factory.max_concurrent(), 1);
    assert_eq!(monitor.get_health_report().reconnect_count, 1);
}

#[tokio::test]
async fn test_second_caller_sees_failed_outcome() {
    let factory = Arc::new(
        FakeSessionFactory::new()
            .always_failing()
            .with_delay(Duration::from_millis(20)),
    );
    let monitor = SessionHealthMonitor::new(
        factory.clone(),
        fast_monitor_settings(2),
        Arc::new(MemoryLogger::new()),
    );

    let (first, second) = tokio::join!(monitor.reconnect(), monitor.reconnect());

    assert!(!first && !second);
    // Two attempts from the single procedure, none from the joiner
    assert_eq!(factory.attempts(), 2);
    assert_eq!(monitor.slot().phase(), SessionPhase::PermanentlyFailed);
}

#[tokio::test]
async fn test_guard_monitor_replaces_invalidated_session() {
    let mut config = fast_config("http://127.0.0.1:4723", None);
    config.monitor.health_check_interval_secs = 1;
    let t = build_guard(config, None);

    t.guard.open_session().await.unwrap();
    let first = t.factory.last_session().unwrap();
    assert!(t.guard.start_monitoring());

    first.fail_pings_with(GuardError::SessionInvalid("invalid session id".into()));
    let deadline = Instant::now() + Duration::from_secs(10);
    while t.guard.get_health_report().reconnect_count == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let report = t.guard.get_health_report();
    assert_eq!(report.reconnect_count, 1);
    assert_eq!(report.session_id.as_deref(), Some("fake-session-2"));
    assert!(first.is_closed());
    assert!(t.logger.contains("re-established"));

    t.guard.shutdown().await;
    assert!(!t.guard.monitor().is_monitoring());
    assert!(t.factory.last_session().unwrap().is_closed());
}
