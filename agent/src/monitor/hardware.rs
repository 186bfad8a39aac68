use std::collections::HashMap;
use std::net::UdpSocket;
use std::process::Command;
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;
use sysinfo::{Components, Disks, Networks, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tokio::sync::RwLock;

use shared::models::hardware::{
    CpuInfo, DiskInfo, HardwareInfo, HostSnapshot, NetworkInfo,
};
use shared::models::heartbeat::{HeartbeatRequest, NetworkUsage};

use crate::monitor::gpu;

const GB: u64 = 1024 * 1024 * 1024;
const NETWORK_SAMPLE_WINDOW: Duration = Duration::from_millis(500);
const GEO_TIMEOUT: Duration = Duration::from_secs(5);

/// Samples host hardware and utilization. The static inventory is cached
/// after the first probe; gauges are sampled fresh on every call.
pub struct Monitor {
    inventory_cache: RwLock<Option<HardwareInfo>>,
    http: reqwest::Client,
}

impl Monitor {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(GEO_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            inventory_cache: RwLock::new(None),
            http,
        }
    }

    /// Full host description for registration reports.
    pub async fn collect_snapshot(&self) -> HostSnapshot {
        let mut sys = System::new_all();
        sys.refresh_all();
        tokio::time::sleep(MINIMUM_CPU_UPDATE_INTERVAL).await;
        sys.refresh_cpu();

        let ip_address = local_ip().unwrap_or_default();
        let location = if ip_address.is_empty() {
            "Unknown".to_string()
        } else {
            self.geolocate(&ip_address).await
        };

        HostSnapshot {
            hostname: System::host_name().unwrap_or_default(),
            ip_address,
            total_ram_gb: (sys.total_memory() + GB / 2) / GB,
            ram_type: ram_type(),
            hardware_info: self.hardware_info().await,
            location,
            status: "online".to_string(),
            cpu_usage: sys.global_cpu_info().cpu_usage(),
            memory_usage: memory_usage(&sys),
            gpu_usage: gpu::average_gpu_utilization(),
            disk_usage: disk_usage(),
            network_usage: sample_network_usage().await,
            cpu_temperature: cpu_temperature(),
        }
    }

    /// Gauges for the periodic heartbeat.
    pub async fn collect_monitoring_data(&self) -> HeartbeatRequest {
        let mut sys = System::new_all();
        sys.refresh_all();
        tokio::time::sleep(MINIMUM_CPU_UPDATE_INTERVAL).await;
        sys.refresh_cpu();

        let network = sample_network_usage().await;
        let up_mbps = network.values().map(|mbps| *mbps as f64).sum();

        HeartbeatRequest {
            status: "online".to_string(),
            cpu_usage: sys.global_cpu_info().cpu_usage(),
            memory_usage: memory_usage(&sys),
            disk_usage: disk_usage(),
            gpu_usage: gpu::gpu_utilization(),
            network_usage: NetworkUsage {
                up_mbps,
                // Interface counters are sampled as a combined rate.
                down_mbps: up_mbps,
            },
        }
    }

    pub async fn hardware_info(&self) -> HardwareInfo {
        if let Some(cached) = self.inventory_cache.read().await.clone() {
            return cached;
        }
        let info = build_hardware_info();
        *self.inventory_cache.write().await = Some(info.clone());
        info
    }

    #[allow(dead_code)]
    pub async fn invalidate_inventory(&self) {
        *self.inventory_cache.write().await = None;
    }

    async fn geolocate(&self, ip: &str) -> String {
        let url = format!("http://ip-api.com/json/{}", ip);
        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!("Geolocation lookup failed: {}", err);
                return "Unknown".to_string();
            }
        };
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                debug!("Geolocation response unreadable: {}", err);
                return "Unknown".to_string();
            }
        };
        match (body.get("city").and_then(Value::as_str), body.get("country").and_then(Value::as_str)) {
            (Some(city), Some(country)) => format!("{}, {}", city, country),
            _ => "Unknown".to_string(),
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

fn build_hardware_info() -> HardwareInfo {
    let mut sys = System::new_all();
    sys.refresh_all();
    HardwareInfo {
        cpus: cpu_inventory(&sys),
        gpus: gpu::gpu_inventory(),
        disks: disk_inventory(),
        networks: network_inventory(),
    }
}

fn cpu_inventory(sys: &System) -> Vec<CpuInfo> {
    let cpus = sys.cpus();
    let Some(first) = cpus.first() else {
        return Vec::new();
    };
    vec![CpuInfo {
        model: first.brand().to_string(),
        cores: cpus.len(),
        frequency_mhz: first.frequency(),
    }]
}

fn disk_inventory() -> Vec<DiskInfo> {
    Disks::new_with_refreshed_list()
        .iter()
        .map(|disk| DiskInfo {
            name: disk.name().to_string_lossy().to_string(),
            mount_point: disk.mount_point().to_string_lossy().to_string(),
            total_gb: disk.total_space() / GB,
            available_gb: disk.available_space() / GB,
        })
        .collect()
}

fn network_inventory() -> Vec<NetworkInfo> {
    Networks::new_with_refreshed_list()
        .iter()
        .map(|(interface, data)| NetworkInfo {
            interface: interface.clone(),
            mac_address: data.mac_address().to_string(),
        })
        .collect()
}

fn memory_usage(sys: &System) -> f32 {
    let total = sys.total_memory();
    if total == 0 {
        return 0.0;
    }
    (sys.used_memory() as f32 / total as f32) * 100.0
}

fn disk_usage() -> HashMap<String, f32> {
    Disks::new_with_refreshed_list()
        .iter()
        .filter_map(|disk| {
            let total = disk.total_space();
            if total == 0 {
                return None;
            }
            let used = total.saturating_sub(disk.available_space());
            Some((
                disk.mount_point().to_string_lossy().to_string(),
                (used as f32 / total as f32) * 100.0,
            ))
        })
        .collect()
}

/// Per-interface throughput in Mbps from a short delta sample.
async fn sample_network_usage() -> HashMap<String, f32> {
    let mut networks = Networks::new_with_refreshed_list();
    tokio::time::sleep(NETWORK_SAMPLE_WINDOW).await;
    networks.refresh();

    networks
        .iter()
        .map(|(interface, data)| {
            let bytes = data.received() + data.transmitted();
            // The sample window is half a second, so double the delta.
            let mbps = (bytes * 8 * 2) as f32 / (1024.0 * 1024.0);
            (interface.clone(), mbps)
        })
        .collect()
}

fn cpu_temperature() -> Option<i32> {
    let components = Components::new_with_refreshed_list();
    components
        .iter()
        .find(|c| c.label().to_lowercase().contains("cpu"))
        .or_else(|| components.iter().next())
        .map(|c| c.temperature() as i32)
}

/// RAM module type ("DDR4", "DDR5", ...) from dmidecode; needs root and
/// degrades to "Unknown" without it.
fn ram_type() -> String {
    let output = match Command::new("dmidecode").args(["-t", "memory"]).output() {
        Ok(output) if output.status.success() => output,
        _ => {
            warn!("dmidecode unavailable, RAM type unknown");
            return "Unknown".to_string();
        }
    };
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("Type: "))
        .map(str::trim)
        .find(|value| !value.is_empty() && *value != "Unknown" && *value != "Other")
        .map(str::to_string)
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Routing-table trick: connecting a UDP socket picks the outbound
/// interface without sending a packet.
fn local_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}
