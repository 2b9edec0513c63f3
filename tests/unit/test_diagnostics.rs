//! Diagnose, repair and re-diagnose through the assembled guard

use sessionguard::diagnostics::{titles, IssueCategory, RepairAction, Severity};
use sessionguard::server::ServerLauncher;
use sessionguard::testing::{free_port, FakeLauncher, MockStatusServer};
use std::sync::Arc;

use super::helpers::{build_guard, fast_config};

const TARGET: &str = "127.0.0.1:62001";

#[tokio::test]
async fn test_offline_target_is_critical_bridge_issue() {
    let server = MockStatusServer::start().await.unwrap();
    let t = build_guard(fast_config(server.url(), Some(TARGET)), None);
    t.bridge.add_device("127.0.0.1:59700", "device");
    t.bridge.add_device(TARGET, "offline");

    let report = t.guard.diagnose_all().await;

    let issue = report.find(titles::DEVICE_OFFLINE).unwrap();
    assert_eq!(issue.category, IssueCategory::Bridge);
    assert_eq!(issue.severity, Severity::Critical);
    assert!(issue.auto_fixable);
    assert_eq!(issue.subject.as_deref(), Some(TARGET));
    assert!(report.contains(titles::SERVER_READY));
    assert!(!report.contains(titles::SESSION_LOST));
    server.stop().await;
}

#[tokio::test]
async fn test_refused_server_is_started_and_rediagnosed() {
    let port = free_port();
    let url = format!("http://127.0.0.1:{}", port);
    let launcher = Arc::new(FakeLauncher::new(port));
    let t = build_guard(
        fast_config(&url, Some(TARGET)),
        Some(launcher.clone() as Arc<dyn ServerLauncher>),
    );
    t.bridge.add_device(TARGET, "device");

    let report = t.guard.diagnose_all().await;
    let issue = report.find(titles::SERVER_NOT_RUNNING).unwrap();
    assert_eq!(issue.category, IssueCategory::AutomationServer);
    assert_eq!(issue.severity, Severity::Critical);
    assert!(issue.auto_fixable);
    // The refused status already explains the closed port
    assert!(!report.contains(titles::SERVER_PORT_UNREACHABLE));

    assert!(t.guard.repair(&report).await);
    assert_eq!(launcher.launches(), 1);

    let after = t.guard.diagnose_all().await;
    assert!(!after.contains(titles::SERVER_NOT_RUNNING));
    assert!(after.contains(titles::SERVER_READY));
    launcher.stop().await;
}

#[tokio::test]
async fn test_repair_cycle_records_each_action() {
    let port = free_port();
    let url = format!("http://127.0.0.1:{}", port);
    let launcher = Arc::new(FakeLauncher::new(port));
    let t = build_guard(
        fast_config(&url, Some(TARGET)),
        Some(launcher.clone() as Arc<dyn ServerLauncher>),
    );
    t.bridge.add_device(TARGET, "offline");
    t.bridge.allow_connect(TARGET);

    let cycle = t.guard.diagnose_and_repair().await;

    let summary = cycle.summary.as_ref().unwrap();
    let actions: Vec<&RepairAction> = summary.records.iter().map(|r| &r.action).collect();
    assert!(actions.contains(&&RepairAction::StartAutomationServer));
    assert!(actions.contains(&&RepairAction::FixOfflineDevice {
        address: TARGET.to_string()
    }));
    assert!(summary.all_succeeded());

    let latest = cycle.latest();
    assert!(!latest.contains(titles::DEVICE_OFFLINE));
    assert!(!latest.contains(titles::SERVER_NOT_RUNNING));
    assert!(t.logger.contains("back online"));
    launcher.stop().await;
}

#[tokio::test]
async fn test_repair_without_launcher_reports_failure() {
    let port = free_port();
    let t = build_guard(
        fast_config(&format!("http://127.0.0.1:{}", port), Some(TARGET)),
        None,
    );
    t.bridge.add_device(TARGET, "device");

    let report = t.guard.diagnose_all().await;
    assert!(report.has_critical());
    assert!(!t.guard.repair(&report).await);
    assert!(t.logger.contains("No launch command configured"));
}

#[tokio::test]
async fn test_report_serializes_for_collaborators() {
    let server = MockStatusServer::start().await.unwrap();
    let t = build_guard(fast_config(server.url(), None), None);

    let report = t.guard.diagnose_all().await;
    // No target and nothing attached
    assert!(report.contains(titles::NO_DEVICES));

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert!(json["issues"].as_array().is_some_and(|issues| !issues.is_empty()));
    server.stop().await;
}

#[tokio::test]
async fn test_lost_session_is_reconnected_by_repair() {
    let server = MockStatusServer::start().await.unwrap();
    let t = build_guard(fast_config(server.url(), None), None);
    t.bridge.add_device("127.0.0.1:5555", "device");

    t.guard.open_session().await.unwrap();
    t.factory
        .last_session()
        .unwrap()
        .fail_pings_with(sessionguard::GuardError::SessionInvalid("no such session".into()));

    let report = t.guard.diagnose_all().await;
    let issue = report.find(titles::SESSION_LOST).unwrap();
    assert_eq!(issue.category, IssueCategory::AutomationServer);

    assert!(t.guard.repair(&report).await);
    assert_eq!(t.guard.get_health_report().reconnect_count, 1);
    server.stop().await;
}

#[tokio::test]
async fn test_diagnose_leaves_session_state_untouched() {
    let server = MockStatusServer::start().await.unwrap();
    let t = build_guard(fast_config(server.url(), None), None);
    t.bridge.add_device("127.0.0.1:5555", "device");

    t.guard.open_session().await.unwrap();
    let before = t.guard.monitor().slot().snapshot();
    t.factory
        .last_session()
        .unwrap()
        .fail_pings_with(sessionguard::GuardError::Network("connection reset".into()));

    let report = t.guard.diagnose_all().await;
    let issue = report.find(titles::SESSION_LOST).unwrap();
    assert!(issue.description.contains("connection reset"));

    let after = t.guard.monitor().slot().snapshot();
    assert_eq!(after.phase, before.phase);
    assert_eq!(after.total_failures, before.total_failures);
    assert_eq!(after.last_error, before.last_error);
    server.stop().await;
}
