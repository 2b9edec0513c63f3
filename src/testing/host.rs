//! Host-side fakes: a fixed resource sampler and a launcher that brings up
//! a [`MockStatusServer`].

use super::mock_server::MockStatusServer;
use crate::errors::GuardError;
use crate::resource::{HostSampler, HostSnapshot};
use crate::server::ServerLauncher;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;

/// Returns the same snapshot, or the same error, on every call.
#[derive(Debug, Clone)]
pub struct StaticSampler {
    result: Result<HostSnapshot, GuardError>,
}

impl StaticSampler {
    pub fn new(snapshot: HostSnapshot) -> Self {
        Self {
            result: Ok(snapshot),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(GuardError::Internal(message.to_string())),
        }
    }
}

#[async_trait]
impl HostSampler for StaticSampler {
    async fn sample(&self) -> Result<HostSnapshot, GuardError> {
        self.result.clone()
    }
}

/// "Starts the automation server" by binding a mock on a reserved port.
pub struct FakeLauncher {
    port: u16,
    launches: AtomicU32,
    server: Mutex<Option<MockStatusServer>>,
}

impl FakeLauncher {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            launches: AtomicU32::new(0),
            server: Mutex::new(None),
        }
    }

    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    pub async fn stop(&self) {
        if let Some(server) = self.server.lock().await.take() {
            server.stop().await;
        }
    }
}

#[async_trait]
impl ServerLauncher for FakeLauncher {
    async fn launch(&self) -> Result<(), GuardError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let mut server = self.server.lock().await;
        if server.is_none() {
            let started = MockStatusServer::start_on_port(self.port)
                .await
                .map_err(|e| GuardError::Server(format!("mock server failed to bind: {}", e)))?;
            *server = Some(started);
        }
        Ok(())
    }
}
