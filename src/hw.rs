use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Machine a session ran on, stored alongside its results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    pub logical_cpus: usize,
    pub total_ram_mb: u64,
    pub os: Option<String>,
    pub cpu_brand: Option<String>,
}

fn cpu_logical() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

pub fn detect_host() -> HostInfo {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu_all();

    let cpu_brand = sys
        .cpus()
        .first()
        .map(|c| c.brand().trim().to_string())
        .filter(|b| !b.is_empty());

    HostInfo {
        logical_cpus: cpu_logical(),
        total_ram_mb: sys.total_memory() / (1024 * 1024), // bytes -> MB
        os: System::long_os_version(),
        cpu_brand,
    }
}
