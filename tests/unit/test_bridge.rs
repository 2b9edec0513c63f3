//! Device bridge controller against the scripted bridge

use sessionguard::bridge::parse::parse_device_list;
use sessionguard::bridge::{BridgeController, DeviceState};
use sessionguard::config::BridgeConfig;
use sessionguard::testing::FakeBridge;
use sessionguard::MemoryLogger;
use std::sync::Arc;

const TARGET: &str = "127.0.0.1:62001";

fn controller(fake: &Arc<FakeBridge>) -> BridgeController {
    BridgeController::with_executable(
        BridgeConfig {
            target_address: Some(TARGET.to_string()),
            settle_delay_ms: 0,
            zombie_retry_delay_ms: 0,
            zombie_cleanup_attempts: 4,
            ..BridgeConfig::default()
        },
        "adb",
        fake.clone(),
        Arc::new(MemoryLogger::new()),
    )
}

#[tokio::test]
async fn test_target_reported_offline() {
    let fake = Arc::new(FakeBridge::new());
    fake.add_device("127.0.0.1:59700", "device");
    fake.add_device(TARGET, "offline");
    let bridge = controller(&fake);

    let devices = bridge.list_devices().await.unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(
        bridge.device_state(TARGET).await.unwrap(),
        Some(DeviceState::Offline)
    );
    assert_eq!(
        bridge.device_state("127.0.0.1:59700").await.unwrap(),
        Some(DeviceState::Connected)
    );
}

#[tokio::test]
async fn test_zombie_cleanup_clears_every_loopback_entry() {
    let fake = Arc::new(FakeBridge::new());
    fake.add_device("127.0.0.1:5555", "offline");
    fake.add_device("127.0.0.1:7555", "unauthorized");
    fake.add_device("emulator-5554", "device");
    let bridge = controller(&fake);

    assert!(bridge.clear_zombie_connections(3).await);
    assert!(bridge.loopback_devices().await.unwrap().is_empty());
    // Emulator serials are not loopback-bound and survive
    assert_eq!(bridge.list_devices().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_zombie_cleanup_succeeds_on_last_allowed_round() {
    let fake = Arc::new(FakeBridge::new());
    fake.add_sticky_device("127.0.0.1:5555", "offline", 3);
    let bridge = controller(&fake);

    assert!(bridge.clear_zombie_connections(3).await);
    assert!(bridge.loopback_devices().await.unwrap().is_empty());
    let restarts = fake.calls().iter().filter(|c| *c == "kill-server").count();
    assert_eq!(restarts, 3);
}

#[tokio::test]
async fn test_zombie_cleanup_gives_up_after_budget() {
    let fake = Arc::new(FakeBridge::new());
    fake.add_sticky_device("127.0.0.1:5555", "offline", 5);
    let bridge = controller(&fake);

    assert!(!bridge.clear_zombie_connections(2).await);
    assert_eq!(bridge.loopback_devices().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_fix_offline_device_reconnects_target() {
    let fake = Arc::new(FakeBridge::new());
    fake.add_device(TARGET, "offline");
    fake.allow_connect(TARGET);
    let bridge = controller(&fake);

    assert!(bridge.fix_offline_device(TARGET).await);
    assert_eq!(
        bridge.device_state(TARGET).await.unwrap(),
        Some(DeviceState::Connected)
    );
}

#[tokio::test]
async fn test_connect_requires_listing() {
    let fake = Arc::new(FakeBridge::new());
    fake.allow_connect_without_listing(TARGET);
    let bridge = controller(&fake);

    assert!(!bridge.connect(TARGET).await);
}

#[test]
fn test_device_list_ignores_banner_and_daemon_noise() {
    let output = "* daemon not running; starting now at tcp:5037\n\
                  * daemon started successfully\n\
                  List of devices attached\n\
                  127.0.0.1:62001\toffline\n\
                  emulator-5554\tdevice product:sdk model:x86\n\n";
    let devices = parse_device_list(output);
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].state, DeviceState::Offline);
    assert_eq!(devices[1].address, "emulator-5554");
    assert_eq!(devices[1].state, DeviceState::Connected);
}
