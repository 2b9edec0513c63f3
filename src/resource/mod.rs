//! Host resource sampling for CPU, memory, and disk

use crate::config::ThresholdBand;
use crate::errors::GuardError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Point-in-time host usage, as percentages in `0.0..=100.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    /// Usage of the disk holding the working directory, if it could be found
    pub disk_percent: Option<f32>,
}

/// Resource pressure levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourcePressure {
    None,
    Warning,
    Critical,
}

impl ResourcePressure {
    /// Classify `percent` against a two-level band.
    pub fn evaluate(percent: f32, band: &ThresholdBand) -> Self {
        if percent >= band.critical {
            Self::Critical
        } else if percent >= band.warning {
            Self::Warning
        } else {
            Self::None
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical)
    }
}

#[async_trait]
pub trait HostSampler: Send + Sync {
    async fn sample(&self) -> Result<HostSnapshot, GuardError>;
}

/// Samples the local host through `sysinfo`.
#[derive(Debug, Clone, Default)]
pub struct SysinfoSampler {
    /// Path whose disk is measured; defaults to the working directory
    pub disk_path: Option<PathBuf>,
}

fn percent(used: u64, total: u64) -> f32 {
    if total > 0 {
        used as f32 / total as f32 * 100.0
    } else {
        0.0
    }
}

fn sample_blocking(disk_path: Option<PathBuf>) -> HostSnapshot {
    use sysinfo::{Disks, System};

    let mut system = System::new();
    system.refresh_cpu_usage();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_cpu_usage();
    system.refresh_memory();

    let cpu_percent = system.global_cpu_usage();
    let memory_percent = percent(system.used_memory(), system.total_memory());

    let path = disk_path.or_else(|| std::env::current_dir().ok());
    let disks = Disks::new_with_refreshed_list();
    // Longest mount point containing the path wins
    let disk_percent = path.and_then(|path| {
        disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| {
                let total = disk.total_space();
                let used = total.saturating_sub(disk.available_space());
                percent(used, total)
            })
    });

    HostSnapshot {
        cpu_percent,
        memory_percent,
        disk_percent,
    }
}

#[async_trait]
impl HostSampler for SysinfoSampler {
    async fn sample(&self) -> Result<HostSnapshot, GuardError> {
        let disk_path = self.disk_path.clone();
        let snapshot = tokio::task::spawn_blocking(move || sample_blocking(disk_path))
            .await
            .map_err(|e| GuardError::Internal(format!("host sampling task failed: {}", e)))?;
        debug!(
            cpu = snapshot.cpu_percent,
            memory = snapshot.memory_percent,
            disk = ?snapshot.disk_percent,
            "Sampled host resources"
        );
        Ok(snapshot)
    }
}
