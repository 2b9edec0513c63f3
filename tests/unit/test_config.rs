//! Config file loading and validation

use sessionguard::config::Config;
use sessionguard::errors::{get_exit_code, EXIT_CONFIG_ERROR};
use sessionguard::supervision::{BackoffStrategy, MonitorSettings};
use sessionguard::GuardError;
use std::io::Write;
use std::time::Duration;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_full_file_round_trips_into_settings() {
    let file = write_config(
        r#"
[bridge]
executable = "/opt/android-sdk/platform-tools/adb"
target_address = "127.0.0.1:21503"
candidate_ports = [21503, 62001]

[server]
base_url = "http://127.0.0.1:4725/wd/hub"
ready_poll_attempts = 10

[monitor]
health_check_interval_secs = 15
max_reconnect_attempts = 4
backoff_cap_secs = 20

[retry]
max_retries = 2
initial_delay_ms = 250
backoff_factor = 3.0

[diagnostics]
cpu = { warning = 70.0, critical = 90.0 }
"#,
    );

    let config = Config::load(file.path().to_str()).unwrap();
    assert_eq!(config.bridge.candidate_ports, vec![21503, 62001]);
    assert_eq!(config.server.endpoint(), Some(("127.0.0.1".to_string(), 4725)));
    assert_eq!(config.server.ready_poll_attempts, 10);
    assert_eq!(config.retry.delay_after(2), Duration::from_millis(750));
    assert_eq!(config.diagnostics.cpu.warning, 70.0);

    let settings = MonitorSettings::from(&config.monitor);
    assert_eq!(settings.health_check_interval, Duration::from_secs(15));
    assert_eq!(settings.max_reconnect_attempts, 4);
    assert_eq!(
        settings.backoff,
        BackoffStrategy::Exponential {
            base: Duration::from_secs(1),
            cap: 20
        }
    );
}

#[test]
fn test_zero_interval_is_rejected_with_config_exit_code() {
    let file = write_config("[monitor]\nhealth_check_interval_secs = 0\n");

    let err = Config::load(file.path().to_str()).unwrap_err();
    assert!(matches!(err.downcast_ref::<GuardError>(), Some(GuardError::Config(_))));
    assert_eq!(get_exit_code(&err), EXIT_CONFIG_ERROR);
}

#[test]
fn test_malformed_toml_maps_to_config_exit_code() {
    let file = write_config("[bridge\nexecutable = ");
    let err = Config::load(file.path().to_str()).unwrap_err();
    assert_eq!(get_exit_code(&err), EXIT_CONFIG_ERROR);
}

#[test]
fn test_inverted_threshold_band_is_rejected() {
    let file = write_config("[diagnostics]\ndisk = { warning = 99.0, critical = 90.0 }\n");
    let err = Config::load(file.path().to_str()).unwrap_err();
    assert!(err.to_string().contains("diagnostics.disk"));
}
