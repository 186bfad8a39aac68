use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One-shot description of the host, sent with the `confirm` and
/// `init` reports. Gauges are a point-in-time sample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub hostname: String,
    pub ip_address: String,
    pub total_ram_gb: u64,
    pub ram_type: String,
    pub hardware_info: HardwareInfo,
    pub location: String,
    pub status: String,
    pub cpu_usage: f32,
    pub memory_usage: f32,
    pub gpu_usage: f32,
    pub disk_usage: HashMap<String, f32>,
    pub network_usage: HashMap<String, f32>,
    pub cpu_temperature: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardwareInfo {
    pub cpus: Vec<CpuInfo>,
    pub gpus: Vec<GpuInfo>,
    pub disks: Vec<DiskInfo>,
    pub networks: Vec<NetworkInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuInfo {
    pub model: String,
    pub cores: usize,
    pub frequency_mhz: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpuInfo {
    pub model: String,
    pub memory_mb: u64,
    pub driver_version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskInfo {
    pub name: String,
    pub mount_point: String,
    pub total_gb: u64,
    pub available_gb: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub interface: String,
    pub mac_address: String,
}
