use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// What the control plane asks the agent to do with a container.
/// Missing or unrecognized values fall back to `Start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Start,
    Stop,
    StopRemove,
}

impl Operation {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("stop") => Self::Stop,
            Some("stop_remove") => Self::StopRemove,
            _ => Self::Start,
        }
    }

}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::StopRemove => "stop_remove",
        })
    }
}

/// Opaque task identifier; the control plane issues both numeric and
/// string ids, so the raw JSON value is kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Value);

impl TaskId {
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(Value::from(id))
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(Value::from(id))
    }
}

/// Task payload as issued by the control plane. Resource fields stay
/// loosely typed on purpose: a malformed field degrades to "unset"
/// during translation instead of failing the whole task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskData {
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub docker_image: Option<String>,
    #[serde(default)]
    pub gpu_required: Option<Value>,
    #[serde(default)]
    pub gpu_enabled_indices: Option<Value>,
    #[serde(default)]
    pub cpu_allocated_ranges: Option<Value>,
    #[serde(default)]
    pub ram_allocated_gb: Option<Value>,
    #[serde(default)]
    pub storage_allocated_gb: Option<Value>,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub container_name: Option<String>,
}

impl TaskData {
    pub fn operation(&self) -> Operation {
        Operation::parse(self.operation.as_deref())
    }
}

/// Connection parameters attached to a task: either a legacy
/// `(ssh_port, ssh_host)` pair or an explicit host-to-container port
/// mapping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerInfo {
    #[serde(default)]
    pub ssh_username: Option<String>,
    #[serde(default)]
    pub ssh_password: Option<String>,
    #[serde(default)]
    pub ssh_port: Option<Value>,
    #[serde(default)]
    pub ssh_host: Option<String>,
    #[serde(default)]
    pub ssh_command: Option<String>,
    #[serde(default)]
    pub port_mapping: Option<Value>,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub container_name: Option<String>,
}

impl ContainerInfo {
    pub fn ssh_port(&self) -> Option<u16> {
        value_to_port(self.ssh_port.as_ref()?)
    }

    /// Host port to container port. Entries that do not parse as
    /// ports are dropped; an empty or non-object mapping counts as
    /// absent, which routes the task through the legacy two-port path.
    pub fn port_mapping(&self) -> Option<BTreeMap<u16, u16>> {
        let raw = self.port_mapping.as_ref()?.as_object()?;
        let mapping: BTreeMap<u16, u16> = raw
            .iter()
            .filter_map(|(host, container)| {
                let host = host.trim().parse::<u16>().ok()?;
                Some((host, value_to_port(container)?))
            })
            .collect();
        if mapping.is_empty() {
            None
        } else {
            Some(mapping)
        }
    }
}

fn value_to_port(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Raw `tasks/pull` payload. A real assignment carries all three of
/// `task_id`, `task_data` and `container_info`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullData {
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub task_data: Option<TaskData>,
    #[serde(default)]
    pub container_info: Option<ContainerInfo>,
    #[serde(default)]
    pub message: Option<String>,
}

impl PullData {
    pub fn into_assignment(self) -> Option<TaskAssignment> {
        match (self.task_id, self.task_data, self.container_info) {
            (Some(id), Some(task_data), Some(container_info)) if !id.is_null() => {
                Some(TaskAssignment {
                    id,
                    task_data,
                    container_info,
                })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskAssignment {
    pub id: TaskId,
    pub task_data: TaskData,
    pub container_info: ContainerInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// Resource summary echoed back to the control plane after a launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatedResources {
    pub cpu_cpuset: Option<String>,
    pub ram_gb: Option<i64>,
    pub gpu_count: i64,
    pub gpu_devices: Option<String>,
    pub storage_gb: Option<i64>,
    pub gpu_support: bool,
}

/// Terminal outcome of one task, with the connection parameters a
/// renter needs when the instance is running.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub container_id: String,
    pub container_name: Option<String>,
    pub ssh_port: Option<u16>,
    pub ssh_host: Option<String>,
    pub ssh_command: Option<String>,
    pub ssh_username: Option<String>,
    pub ssh_password: Option<String>,
    pub port_mapping: Option<BTreeMap<u16, u16>>,
    pub error_message: Option<String>,
    pub allocated_resources: Option<AllocatedResources>,
}

impl TaskResult {
    pub fn completed(container_id: String, container_name: Option<String>) -> Self {
        Self {
            status: TaskStatus::Completed,
            container_id,
            container_name,
            ssh_port: None,
            ssh_host: None,
            ssh_command: None,
            ssh_username: None,
            ssh_password: None,
            port_mapping: None,
            error_message: None,
            allocated_resources: None,
        }
    }

    pub fn failed(
        container_id: String,
        container_name: Option<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            status: TaskStatus::Failed,
            error_message: Some(error_message.into()),
            ..Self::completed(container_id, container_name)
        }
    }
}

/// Wire payload for the `tasks/{id}/status` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: TaskStatus,
    pub container_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&TaskResult> for StatusUpdate {
    fn from(result: &TaskResult) -> Self {
        let mut update = StatusUpdate {
            status: result.status,
            container_id: result.container_id.clone(),
            container_name: result.container_name.clone(),
            progress: None,
            output: None,
            error_message: None,
        };
        match result.status {
            TaskStatus::Running => {
                update.progress = Some(0.0);
                if let (Some(host), Some(port), Some(name)) =
                    (&result.ssh_host, result.ssh_port, &result.container_name)
                {
                    update.output = Some(format!(
                        "Container {name} started successfully. SSH ready on {host}:{port}"
                    ));
                }
            }
            TaskStatus::Failed => update.error_message = result.error_message.clone(),
            TaskStatus::Completed => {}
        }
        update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operation_defaults_to_start() {
        assert_eq!(Operation::parse(None), Operation::Start);
        assert_eq!(Operation::parse(Some("")), Operation::Start);
        assert_eq!(Operation::parse(Some("restart")), Operation::Start);
        assert_eq!(Operation::parse(Some(" STOP ")), Operation::Stop);
        assert_eq!(Operation::parse(Some("stop_remove")), Operation::StopRemove);
    }

    #[test]
    fn port_mapping_parses_string_keys_and_drops_garbage() {
        let info = ContainerInfo {
            port_mapping: Some(json!({"5000": 22, "5001": "8888", "oops": 9000})),
            ..Default::default()
        };
        let mapping = info.port_mapping().unwrap();
        assert_eq!(mapping.get(&5000), Some(&22));
        assert_eq!(mapping.get(&5001), Some(&8888));
        assert_eq!(mapping.len(), 2);
    }

    #[test]
    fn empty_port_mapping_counts_as_absent() {
        let info = ContainerInfo {
            port_mapping: Some(json!({})),
            ..Default::default()
        };
        assert!(info.port_mapping().is_none());
    }

    #[test]
    fn pull_data_requires_all_three_fields() {
        let incomplete: PullData = serde_json::from_value(json!({
            "task_id": 3,
            "message": "partial"
        }))
        .unwrap();
        assert!(incomplete.into_assignment().is_none());

        let complete: PullData = serde_json::from_value(json!({
            "task_id": 3,
            "task_data": {"docker_image": "x"},
            "container_info": {}
        }))
        .unwrap();
        let assignment = complete.into_assignment().unwrap();
        assert_eq!(assignment.id.to_string(), "3");
    }

    #[test]
    fn running_status_update_carries_ssh_endpoint() {
        let result = TaskResult {
            status: TaskStatus::Running,
            container_id: "abc".to_string(),
            container_name: Some("task_1".to_string()),
            ssh_port: Some(5000),
            ssh_host: Some("198.51.100.7".to_string()),
            ssh_command: None,
            ssh_username: None,
            ssh_password: None,
            port_mapping: None,
            error_message: None,
            allocated_resources: None,
        };
        let update = StatusUpdate::from(&result);
        assert_eq!(update.progress, Some(0.0));
        assert_eq!(
            update.output.as_deref(),
            Some("Container task_1 started successfully. SSH ready on 198.51.100.7:5000")
        );
    }

    #[test]
    fn failed_status_update_carries_error_message() {
        let result = TaskResult::failed(String::new(), None, "stop failed");
        let update = StatusUpdate::from(&result);
        assert_eq!(update.status, TaskStatus::Failed);
        assert_eq!(update.error_message.as_deref(), Some("stop failed"));
        assert!(update.output.is_none());
    }
}
