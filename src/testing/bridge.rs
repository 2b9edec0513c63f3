//! Scripted stand-in for the device bridge tool.

use crate::bridge::{CommandOutput, CommandRunner};
use crate::errors::GuardError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone)]
struct FakeDevice {
    address: String,
    state: String,
    /// Disconnects left before the entry actually goes away
    disconnects_to_remove: u32,
}

#[derive(Debug, Default)]
struct FakeBridgeState {
    devices: Vec<FakeDevice>,
    connectable: HashSet<String>,
    phantom: HashSet<String>,
    calls: Vec<String>,
}

/// Keeps an in-memory device table and answers the subcommands the
/// controller issues the way the real tool words them.
#[derive(Debug, Default)]
pub struct FakeBridge {
    state: Mutex<FakeBridgeState>,
}

impl FakeBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// List `address` with a raw state token such as `"device"` or
    /// `"offline"`.
    pub fn add_device(&self, address: &str, state: &str) {
        self.add_sticky_device(address, state, 1);
    }

    /// An entry that only disappears on its `disconnects`-th disconnect.
    pub fn add_sticky_device(&self, address: &str, state: &str, disconnects: u32) {
        let mut inner = self.state.lock();
        inner.devices.retain(|d| d.address != address);
        inner.devices.push(FakeDevice {
            address: address.to_string(),
            state: state.to_string(),
            disconnects_to_remove: disconnects.max(1),
        });
    }

    /// `connect address` succeeds and lists the device as `device`.
    pub fn allow_connect(&self, address: &str) {
        self.state.lock().connectable.insert(address.to_string());
    }

    /// `connect address` prints success but the device never shows up.
    pub fn allow_connect_without_listing(&self, address: &str) {
        self.state.lock().phantom.insert(address.to_string());
    }

    /// Every invocation so far, arguments joined by spaces.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    fn devices_output(inner: &FakeBridgeState) -> String {
        let mut out = String::from("List of devices attached\n");
        for device in &inner.devices {
            out.push_str(&format!("{}\t{}\n", device.address, device.state));
        }
        out
    }

    fn connect(inner: &mut FakeBridgeState, address: &str) -> CommandOutput {
        if inner.phantom.contains(address) {
            return CommandOutput::ok(format!("connected to {}\n", address));
        }
        if !inner.connectable.contains(address) {
            return CommandOutput {
                exit_code: Some(1),
                stdout: format!(
                    "cannot connect to {}: No connection could be made (10061)\n",
                    address
                ),
                stderr: String::new(),
            };
        }
        match inner.devices.iter_mut().find(|d| d.address == address) {
            Some(device) if device.state == "device" => {
                CommandOutput::ok(format!("already connected to {}\n", address))
            }
            Some(device) => {
                device.state = "device".to_string();
                CommandOutput::ok(format!("connected to {}\n", address))
            }
            None => {
                inner.devices.push(FakeDevice {
                    address: address.to_string(),
                    state: "device".to_string(),
                    disconnects_to_remove: 1,
                });
                CommandOutput::ok(format!("connected to {}\n", address))
            }
        }
    }

    fn disconnect(inner: &mut FakeBridgeState, address: &str) -> CommandOutput {
        let Some(pos) = inner.devices.iter().position(|d| d.address == address) else {
            return CommandOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: format!("error: no such device '{}'\n", address),
            };
        };
        let device = &mut inner.devices[pos];
        device.disconnects_to_remove -= 1;
        if device.disconnects_to_remove == 0 {
            inner.devices.remove(pos);
        }
        CommandOutput::ok(format!("disconnected {}\n", address))
    }
}

#[async_trait]
impl CommandRunner for FakeBridge {
    async fn run(
        &self,
        _program: &Path,
        args: &[&str],
        _timeout: Duration,
    ) -> Result<CommandOutput, GuardError> {
        let mut inner = self.state.lock();
        inner.calls.push(args.join(" "));

        let output = match args {
            ["version"] => CommandOutput::ok("Android Debug Bridge version 1.0.41\nVersion 34.0.5\n"),
            ["devices"] => CommandOutput::ok(Self::devices_output(&inner)),
            ["connect", address] => Self::connect(&mut inner, address),
            ["disconnect", address] => Self::disconnect(&mut inner, address),
            ["kill-server"] | ["start-server"] => CommandOutput::ok(""),
            _ => CommandOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: format!("unknown command: {}", args.join(" ")),
            },
        };
        Ok(output)
    }
}
