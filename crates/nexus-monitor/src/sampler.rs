//! System metrics collection via sysinfo.

use parking_lot::Mutex;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};

/// One sampling pass over the host
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct SystemSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    /// Root volume usage; `None` when no root mount is found
    pub disk_percent: Option<f64>,
    pub memory_total: u64,
    pub memory_used: u64,
}

/// Stateful sampler; CPU usage needs refresh-to-refresh deltas, so the
/// `System` instance is kept alive between samples.
pub struct SystemSampler {
    system: Mutex<System>,
}

impl SystemSampler {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        Self {
            system: Mutex::new(system),
        }
    }

    /// Refresh and read CPU, memory, and root-disk usage.
    ///
    /// Blocking; call from a worker pool, not the event loop.
    pub fn sample(&self) -> SystemSample {
        let mut sys = self.system.lock();
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let cpu_percent = sys.global_cpu_info().cpu_usage() as f64;

        let memory_total = sys.total_memory();
        let memory_used = sys.used_memory();
        let memory_percent = if memory_total > 0 {
            (memory_used as f64 / memory_total as f64) * 100.0
        } else {
            0.0
        };

        SystemSample {
            cpu_percent,
            memory_percent,
            disk_percent: root_disk_percent(),
            memory_total,
            memory_used,
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Usage of the root partition (`/`, or `C:\` on Windows)
fn root_disk_percent() -> Option<f64> {
    let disks = Disks::new_with_refreshed_list();
    for disk in disks.list() {
        let mount_point = disk.mount_point().to_string_lossy();
        if mount_point == "/" || mount_point == "C:\\" {
            let total = disk.total_space();
            let available = disk.available_space();
            if total > 0 {
                let used = total - available;
                return Some((used as f64 / total as f64) * 100.0);
            }
        }
    }
    None
}
