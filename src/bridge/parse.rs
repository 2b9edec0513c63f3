//! Text parsing for bridge tool output.
//!
//! The tool only speaks text, so device states and connect outcomes are
//! recognised by matching tokens against the explicit tables below. The
//! wording is not guaranteed stable across tool versions or locales; when it
//! changes, change the tables, not the callers.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Connected,
    Offline,
    Unauthorized,
    Unknown,
}

impl DeviceState {
    /// Offline and unauthorized entries are left behind by devices that went
    /// away without a clean teardown.
    pub fn is_zombie(&self) -> bool {
        matches!(self, Self::Offline | Self::Unauthorized)
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Offline => write!(f, "offline"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// State column token → state. First match wins.
pub const DEVICE_STATE_RULES: &[(&str, DeviceState)] = &[
    ("device", DeviceState::Connected),
    ("offline", DeviceState::Offline),
    ("unauthorized", DeviceState::Unauthorized),
];

/// Substrings of `connect` output that mean the device is attached.
pub const CONNECT_SUCCESS_MARKERS: &[&str] = &["already connected to", "connected to"];

/// Substrings of `connect` output that override a success marker.
pub const CONNECT_FAILURE_MARKERS: &[&str] = &["failed to connect", "cannot connect", "unable to connect"];

/// One row of the device list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub address: String,
    pub state: DeviceState,
    /// State token as printed by the tool
    pub raw_state: String,
}

pub fn parse_state(token: &str) -> DeviceState {
    let token = token.trim().to_lowercase();
    DEVICE_STATE_RULES
        .iter()
        .find(|(t, _)| *t == token)
        .map(|(_, s)| *s)
        .unwrap_or(DeviceState::Unknown)
}

fn device_line() -> &'static Regex {
    static LINE: OnceLock<Regex> = OnceLock::new();
    LINE.get_or_init(|| Regex::new(r"^(\S+)\s+(\S+)").expect("invalid device line regex"))
}

/// Parse the output of the `devices` subcommand.
///
/// Skips the "List of devices attached" header, daemon banner lines
/// (`* daemon ...`) and blanks.
pub fn parse_device_list(output: &str) -> Vec<DeviceEntry> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with('*'))
        .filter(|line| !line.to_lowercase().starts_with("list of devices"))
        .filter_map(|line| {
            let caps = device_line().captures(line)?;
            let raw_state = caps.get(2)?.as_str().to_string();
            Some(DeviceEntry {
                address: caps.get(1)?.as_str().to_string(),
                state: parse_state(&raw_state),
                raw_state,
            })
        })
        .collect()
}

/// Interpret `connect` output. The exit status of `connect` is not reliable,
/// so callers must still re-verify with the device list.
pub fn connect_reported_success(output: &str) -> bool {
    let lower = output.to_lowercase();
    if CONNECT_FAILURE_MARKERS.iter().any(|m| lower.contains(m)) {
        return false;
    }
    CONNECT_SUCCESS_MARKERS.iter().any(|m| lower.contains(m))
}

/// True for TCP serials bound to the loopback interface (or to `host`).
pub fn is_loopback_address(address: &str, host: &str) -> bool {
    let Some((addr_host, _)) = address.rsplit_once(':') else {
        return false;
    };
    addr_host == "127.0.0.1" || addr_host == "localhost" || addr_host == host
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_list_states() {
        let output = "List of devices attached\n127.0.0.1:59700\tdevice\n127.0.0.1:62001\toffline\nemulator-5554\tunauthorized\n\n";
        let devices = parse_device_list(output);
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].address, "127.0.0.1:59700");
        assert_eq!(devices[0].state, DeviceState::Connected);
        assert_eq!(devices[1].state, DeviceState::Offline);
        assert_eq!(devices[2].state, DeviceState::Unauthorized);
    }

    #[test]
    fn test_parse_device_list_skips_daemon_banner() {
        let output = "* daemon not running; starting now at tcp:5037\n* daemon started successfully\nList of devices attached\n127.0.0.1:5555 device product:x model:y";
        let devices = parse_device_list(output);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].address, "127.0.0.1:5555");
        assert_eq!(devices[0].state, DeviceState::Connected);
    }

    #[test]
    fn test_parse_unknown_state() {
        let devices = parse_device_list("List of devices attached\n127.0.0.1:7555\trecovery");
        assert_eq!(devices[0].state, DeviceState::Unknown);
        assert_eq!(devices[0].raw_state, "recovery");
    }

    #[test]
    fn test_parse_empty_list() {
        assert!(parse_device_list("List of devices attached\n").is_empty());
        assert!(parse_device_list("").is_empty());
    }

    #[test]
    fn test_connect_markers() {
        assert!(connect_reported_success("connected to 127.0.0.1:62001"));
        assert!(connect_reported_success("already connected to 127.0.0.1:62001"));
        assert!(!connect_reported_success(
            "cannot connect to 127.0.0.1:62001: Connection refused (111)"
        ));
        assert!(!connect_reported_success("failed to connect to '127.0.0.1:62001'"));
        assert!(!connect_reported_success(""));
    }

    #[test]
    fn test_loopback_detection() {
        assert!(is_loopback_address("127.0.0.1:62001", "127.0.0.1"));
        assert!(is_loopback_address("localhost:5555", "127.0.0.1"));
        assert!(is_loopback_address("10.0.2.2:5555", "10.0.2.2"));
        assert!(!is_loopback_address("192.168.1.20:5555", "127.0.0.1"));
        assert!(!is_loopback_address("emulator-5554", "127.0.0.1"));
    }

    #[test]
    fn test_zombie_states() {
        assert!(DeviceState::Offline.is_zombie());
        assert!(DeviceState::Unauthorized.is_zombie());
        assert!(!DeviceState::Connected.is_zombie());
        assert!(!DeviceState::Unknown.is_zombie());
    }
}
