use std::collections::HashMap;
use std::process::Command;
use std::sync::Mutex;

use lazy_static::lazy_static;
use log::debug;
use nvml_wrapper::Nvml;

use shared::models::hardware::GpuInfo;

// NVML is initialized once and reused across probes.
lazy_static! {
    static ref NVML: Mutex<Option<Nvml>> = Mutex::new(None);
}

fn with_nvml<T>(f: impl FnOnce(&Nvml) -> Option<T>) -> Option<T> {
    let mut guard = NVML.lock().ok()?;
    if guard.is_none() {
        let nvml = Nvml::init().or_else(|_| {
            Nvml::builder()
                .lib_path(std::ffi::OsStr::new(
                    "/usr/lib/x86_64-linux-gnu/libnvidia-ml.so.1",
                ))
                .init()
        });
        match nvml {
            Ok(nvml) => *guard = Some(nvml),
            Err(err) => {
                debug!("NVML unavailable: {}", err);
                return None;
            }
        }
    }
    f(guard.as_ref()?)
}

pub fn gpu_inventory() -> Vec<GpuInfo> {
    with_nvml(|nvml| {
        let count = nvml.device_count().ok()?;
        let driver_version = nvml.sys_driver_version().ok();
        let mut gpus = Vec::new();
        for index in 0..count {
            let Ok(device) = nvml.device_by_index(index) else {
                continue;
            };
            gpus.push(GpuInfo {
                model: device.name().unwrap_or_default(),
                memory_mb: device
                    .memory_info()
                    .map(|m| m.total / 1024 / 1024)
                    .unwrap_or_default(),
                driver_version: driver_version.clone(),
            });
        }
        Some(gpus)
    })
    .unwrap_or_default()
}

/// Per-device utilization keyed "gpu0", "gpu1", ...
pub fn gpu_utilization() -> HashMap<String, f32> {
    with_nvml(|nvml| {
        let count = nvml.device_count().ok()?;
        let mut usage = HashMap::new();
        for index in 0..count {
            let Ok(device) = nvml.device_by_index(index) else {
                continue;
            };
            if let Ok(rates) = device.utilization_rates() {
                usage.insert(format!("gpu{}", index), rates.gpu as f32);
            }
        }
        Some(usage)
    })
    .unwrap_or_default()
}

pub fn average_gpu_utilization() -> f32 {
    let usage = gpu_utilization();
    if usage.is_empty() {
        return 0.0;
    }
    usage.values().sum::<f32>() / usage.len() as f32
}

/// GPU tasks need both a visible NVIDIA device and the container toolkit
/// that wires devices into Docker.
pub fn passthrough_available() -> bool {
    let has_device = with_nvml(|nvml| nvml.device_count().ok()).unwrap_or(0) > 0;
    if !has_device {
        return false;
    }
    Command::new("which")
        .arg("nvidia-ctk")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}
