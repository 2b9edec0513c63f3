use sessionguard::config::Config;
use sessionguard::resource::HostSnapshot;
use sessionguard::server::ServerLauncher;
use sessionguard::testing::{FakeBridge, FakeSessionFactory, StaticSampler};
use sessionguard::{Collaborators, MemoryLogger, SessionGuard};
use std::sync::Arc;

pub struct TestGuard {
    pub guard: SessionGuard,
    pub bridge: Arc<FakeBridge>,
    pub factory: Arc<FakeSessionFactory>,
    pub logger: Arc<MemoryLogger>,
}

/// Config with no settle delays and short probe and poll intervals.
pub fn fast_config(server_url: &str, target: Option<&str>) -> Config {
    let mut config = Config::default();
    config.server.base_url = server_url.to_string();
    config.server.ready_poll_interval_ms = 50;
    config.bridge.target_address = target.map(str::to_string);
    config.bridge.settle_delay_ms = 0;
    config.bridge.zombie_retry_delay_ms = 0;
    config.diagnostics.probe_timeout_ms = 300;
    config.retry.initial_delay_ms = 1;
    config
}

pub fn calm_host() -> HostSnapshot {
    HostSnapshot {
        cpu_percent: 12.0,
        memory_percent: 35.0,
        disk_percent: Some(40.0),
    }
}

pub fn build_guard(config: Config, launcher: Option<Arc<dyn ServerLauncher>>) -> TestGuard {
    let bridge = Arc::new(FakeBridge::new());
    let factory = Arc::new(FakeSessionFactory::new());
    let logger = Arc::new(MemoryLogger::new());
    let collaborators = Collaborators {
        runner: bridge.clone(),
        factory: factory.clone(),
        sampler: Arc::new(StaticSampler::new(calm_host())),
        launcher,
        bridge_executable: Some("adb".into()),
    };
    let guard = SessionGuard::new(config, collaborators, logger.clone()).unwrap();
    TestGuard {
        guard,
        bridge,
        factory,
        logger,
    }
}
