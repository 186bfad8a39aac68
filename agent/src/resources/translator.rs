use serde_json::Value;

use shared::models::task::TaskData;

/// Container runtime limits derived from a task's resource grant.
///
/// Every field is optional because the control plane omits limits the
/// renter did not reserve; an absent field means "no constraint".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeParams {
    /// GPU device indices as a Docker selector ("0,2" or "all"),
    /// `None` when the task reserved no GPUs.
    pub gpu_devices: Option<String>,
    pub gpu_count: i64,
    /// cpuset in Docker range syntax, e.g. "0-3,8-11".
    pub cpuset_cpus: Option<String>,
    pub memory_gb: Option<i64>,
    pub memory_swap_gb: Option<i64>,
    pub shm_size_gb: Option<i64>,
    pub storage_gb: Option<i64>,
}

impl RuntimeParams {
    pub fn from_task(task: &TaskData) -> Self {
        let gpu_count = int_value(task.gpu_required.as_ref()).unwrap_or(0).max(0);
        let gpu_devices = gpu_selector(gpu_count, task.gpu_enabled_indices.as_ref());
        let cpuset_cpus = cpuset(task.cpu_allocated_ranges.as_ref());
        let memory_gb = int_value(task.ram_allocated_gb.as_ref()).filter(|gb| *gb > 0);
        let storage_gb = int_value(task.storage_allocated_gb.as_ref()).filter(|gb| *gb > 0);

        Self {
            gpu_devices,
            gpu_count,
            cpuset_cpus,
            memory_gb,
            // Swap is pinned to the RAM grant so the container cannot page
            // beyond what the renter reserved.
            memory_swap_gb: memory_gb,
            shm_size_gb: memory_gb.map(|gb| (gb / 2).max(1)),
            storage_gb,
        }
    }
}

/// Accepts both JSON numbers and numeric strings; the control plane is not
/// consistent about which one it sends.
fn int_value(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `None` means no GPU access at all; "all" exposes every device and is the
/// fallback whenever the index list is absent or not fully parseable.
fn gpu_selector(gpu_count: i64, indices: Option<&Value>) -> Option<String> {
    if gpu_count <= 0 {
        return None;
    }
    let selector = match indices {
        Some(Value::Array(items)) if !items.is_empty() => items
            .iter()
            .map(|item| int_value(Some(item)))
            .collect::<Option<Vec<i64>>>()
            .map(|parsed| {
                parsed
                    .iter()
                    .map(i64::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_else(|| "all".to_string()),
        _ => "all".to_string(),
    };
    Some(selector)
}

/// Builds a cpuset from `[[start, end], ...]` pairs. Elements that are not
/// two-item arrays are skipped; an unparseable bound anywhere drops the
/// whole cpuset rather than granting a partial allocation.
fn cpuset(ranges: Option<&Value>) -> Option<String> {
    let items = match ranges? {
        Value::Array(items) => items,
        _ => return None,
    };
    let mut parts = Vec::new();
    for item in items {
        let pair = match item {
            Value::Array(pair) if pair.len() == 2 => pair,
            _ => continue,
        };
        let start = int_value(Some(&pair[0]))?;
        let end = int_value(Some(&pair[1]))?;
        parts.push(format!("{}-{}", start, end));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(fields: Value) -> TaskData {
        serde_json::from_value(fields).unwrap()
    }

    #[test]
    fn ram_grant_sets_memory_swap_and_shm() {
        let params = RuntimeParams::from_task(&task(json!({"ram_allocated_gb": 8})));
        assert_eq!(params.memory_gb, Some(8));
        assert_eq!(params.memory_swap_gb, Some(8));
        assert_eq!(params.shm_size_gb, Some(4));
    }

    #[test]
    fn shm_never_drops_below_one_gb() {
        let params = RuntimeParams::from_task(&task(json!({"ram_allocated_gb": 1})));
        assert_eq!(params.shm_size_gb, Some(1));
    }

    #[test]
    fn absent_ram_leaves_memory_unconstrained() {
        let params = RuntimeParams::from_task(&task(json!({})));
        assert_eq!(params.memory_gb, None);
        assert_eq!(params.shm_size_gb, None);
    }

    #[test]
    fn cpu_ranges_become_cpuset_syntax() {
        let params = RuntimeParams::from_task(&task(json!({
            "cpu_allocated_ranges": [[0, 3], [8, 11]]
        })));
        assert_eq!(params.cpuset_cpus.as_deref(), Some("0-3,8-11"));
    }

    #[test]
    fn malformed_cpu_bound_drops_whole_cpuset() {
        let params = RuntimeParams::from_task(&task(json!({
            "cpu_allocated_ranges": [[0, 3], ["x", 11]]
        })));
        assert_eq!(params.cpuset_cpus, None);
    }

    #[test]
    fn non_pair_elements_are_skipped() {
        let params = RuntimeParams::from_task(&task(json!({
            "cpu_allocated_ranges": [[0, 3], [5], "junk"]
        })));
        assert_eq!(params.cpuset_cpus.as_deref(), Some("0-3"));
    }

    #[test]
    fn gpu_indices_join_into_selector() {
        let params = RuntimeParams::from_task(&task(json!({
            "gpu_required": 2,
            "gpu_enabled_indices": [0, 2]
        })));
        assert_eq!(params.gpu_devices.as_deref(), Some("0,2"));
        assert_eq!(params.gpu_count, 2);
    }

    #[test]
    fn empty_or_bad_indices_fall_back_to_all() {
        let empty = RuntimeParams::from_task(&task(json!({
            "gpu_required": 1,
            "gpu_enabled_indices": []
        })));
        assert_eq!(empty.gpu_devices.as_deref(), Some("all"));

        let bad = RuntimeParams::from_task(&task(json!({
            "gpu_required": 1,
            "gpu_enabled_indices": [0, "two"]
        })));
        assert_eq!(bad.gpu_devices.as_deref(), Some("all"));
    }

    #[test]
    fn zero_gpus_means_no_selector() {
        let params = RuntimeParams::from_task(&task(json!({"gpu_required": 0})));
        assert_eq!(params.gpu_devices, None);
        assert_eq!(params.gpu_count, 0);
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let params = RuntimeParams::from_task(&task(json!({
            "ram_allocated_gb": "16",
            "storage_allocated_gb": "100"
        })));
        assert_eq!(params.memory_gb, Some(16));
        assert_eq!(params.storage_gb, Some(100));
    }
}
