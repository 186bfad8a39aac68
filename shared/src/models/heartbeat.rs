use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Periodic health report. `gpu_usage` is keyed `gpu0`, `gpu1`, ...
/// with utilization percentages; `disk_usage` is keyed by mount point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub status: String,
    pub cpu_usage: f32,
    pub memory_usage: f32,
    pub disk_usage: HashMap<String, f32>,
    pub gpu_usage: HashMap<String, f32>,
    pub network_usage: NetworkUsage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkUsage {
    pub up_mbps: f64,
    pub down_mbps: f64,
}
