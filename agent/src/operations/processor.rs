use std::collections::BTreeMap;
use std::sync::Arc;

use log::{error, info};

use shared::models::task::{
    AllocatedResources, ContainerInfo, Operation, TaskAssignment, TaskResult, TaskStatus,
};

use crate::api::ApiClient;
use crate::docker::{ContainerEngine, InstanceController, LaunchError, SessionCredentials};
use crate::resources::{container_name, RuntimeParams};

#[derive(Debug, thiserror::Error)]
enum StartError {
    #[error("docker_image not specified in task")]
    MissingImage,
    #[error("ssh_password not provided for task")]
    MissingSshPassword,
    #[error("ssh_password and ssh_port are required for task")]
    MissingSshCredentials,
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// Turns one task assignment into a terminal [`TaskResult`]. Never returns
/// an error: every failure becomes a `failed` result so the control plane
/// always learns the outcome.
pub struct TaskProcessor<E> {
    controller: InstanceController<E>,
    client: Arc<ApiClient>,
}

impl<E: ContainerEngine> TaskProcessor<E> {
    pub fn new(controller: InstanceController<E>, client: Arc<ApiClient>) -> Self {
        Self { controller, client }
    }

    pub async fn process(&self, task: &TaskAssignment) -> TaskResult {
        match task.task_data.operation() {
            Operation::Start => self.process_start(task).await,
            operation => self.process_control(task, operation).await,
        }
    }

    async fn process_control(&self, task: &TaskAssignment, operation: Operation) -> TaskResult {
        let name = task
            .task_data
            .container_name
            .clone()
            .or_else(|| task.container_info.container_name.clone());
        let container_id = task
            .task_data
            .container_id
            .clone()
            .or_else(|| task.container_info.container_id.clone());
        let Some(container_id) = container_id else {
            let message = "Missing container_id in control task";
            error!("Task {}: {}", task.id, message);
            self.client
                .send_log(&format!("control task failed: op={} reason={}", operation, message))
                .await;
            return TaskResult::failed(String::new(), name, message);
        };

        info!("Task {}: {} container {}", task.id, operation, container_id);
        self.client
            .send_log(&format!(
                "control task received: op={} container_id={}",
                operation, container_id
            ))
            .await;

        let mut failed_steps = Vec::new();
        if !self.controller.stop_by_id(&container_id).await {
            failed_steps.push("stop failed");
        }
        if operation == Operation::StopRemove && !self.controller.remove_by_id(&container_id).await
        {
            failed_steps.push("remove failed");
        }

        if failed_steps.is_empty() {
            self.client
                .send_log(&format!(
                    "control task completed: op={} container_id={}",
                    operation, container_id
                ))
                .await;
            TaskResult::completed(container_id, name)
        } else {
            let message = failed_steps.join(", ");
            self.client
                .send_log(&format!(
                    "control task failed: op={} container_id={} reason={}",
                    operation, container_id, message
                ))
                .await;
            TaskResult::failed(container_id, name, message)
        }
    }

    async fn process_start(&self, task: &TaskAssignment) -> TaskResult {
        match self.try_start(task).await {
            Ok(result) => result,
            Err(err) => {
                let message = err.to_string();
                error!("Task {} failed to start: {}", task.id, message);
                self.client
                    .send_log(&format!("task start failed: id={} reason={}", task.id, message))
                    .await;
                TaskResult::failed(String::new(), None, message)
            }
        }
    }

    async fn try_start(&self, task: &TaskAssignment) -> Result<TaskResult, StartError> {
        let image = task
            .task_data
            .docker_image
            .clone()
            .ok_or(StartError::MissingImage)?;
        let info = &task.container_info;
        let (port_mapping, ssh_port) = resolve_ports(info)?;
        let ssh_password = info
            .ssh_password
            .clone()
            .ok_or(StartError::MissingSshPassword)?;

        let name = container_name(&task.id);
        let params = RuntimeParams::from_task(&task.task_data);
        info!("Task {}: starting container {} from {}", task.id, name, image);
        self.client
            .send_log(&format!("task start requested: id={} image={}", task.id, image))
            .await;

        let credentials = SessionCredentials {
            ssh_password: ssh_password.clone(),
            // The Jupyter token mirrors the SSH password so the renter has
            // a single credential for the whole session.
            jupyter_token: ssh_password.clone(),
        };
        let container_id = self
            .controller
            .start(&name, &image, &params, &port_mapping, &credentials)
            .await?;

        let ssh_host = info.ssh_host.clone();
        let ssh_command = info.ssh_command.clone().or_else(|| {
            let host = ssh_host.as_deref()?;
            Some(format!("ssh root@{} -p {}", host, ssh_port?))
        });

        Ok(TaskResult {
            status: TaskStatus::Running,
            container_id,
            container_name: Some(name),
            ssh_port,
            ssh_host,
            ssh_command,
            ssh_username: info.ssh_username.clone(),
            ssh_password: Some(ssh_password),
            port_mapping: Some(port_mapping),
            error_message: None,
            allocated_resources: Some(AllocatedResources {
                cpu_cpuset: params.cpuset_cpus.clone(),
                ram_gb: params.memory_gb,
                gpu_count: params.gpu_count,
                gpu_devices: params.gpu_devices.clone(),
                storage_gb: params.storage_gb,
                gpu_support: params.gpu_devices.is_some(),
            }),
        })
    }
}

/// Derives the host-to-container port map and the advertised SSH port.
///
/// With an explicit mapping, the SSH port is the host port bound to
/// container port 22. The legacy path publishes `ssh_port` to 22 and the
/// next port to Jupyter on 8888.
fn resolve_ports(
    info: &ContainerInfo,
) -> Result<(BTreeMap<u16, u16>, Option<u16>), StartError> {
    if let Some(mapping) = info.port_mapping() {
        let ssh_port = mapping
            .iter()
            .find(|(_, container)| **container == 22)
            .map(|(host, _)| *host);
        return Ok((mapping, ssh_port));
    }

    let ssh_port = info.ssh_port().ok_or(StartError::MissingSshCredentials)?;
    let mut mapping = BTreeMap::new();
    mapping.insert(ssh_port, 22);
    if let Some(jupyter_port) = ssh_port.checked_add(1) {
        mapping.insert(jupyter_port, 8888);
    }
    Ok((mapping, Some(ssh_port)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::testing::{EngineCall, FakeEngine};
    use serde_json::json;
    use shared::models::task::{TaskData, TaskId};
    use std::net::TcpListener;

    fn client() -> Arc<ApiClient> {
        // Unregistered client: send_log is a no-op and nothing hits the wire.
        Arc::new(ApiClient::new(
            "http://127.0.0.1:9".to_string(),
            "test".to_string(),
        ))
    }

    fn processor(engine: Arc<FakeEngine>) -> TaskProcessor<FakeEngine> {
        TaskProcessor::new(InstanceController::new(engine, false), client())
    }

    fn assignment(id: i64, task_data: serde_json::Value, info: serde_json::Value) -> TaskAssignment {
        TaskAssignment {
            id: TaskId::from(id),
            task_data: serde_json::from_value::<TaskData>(task_data).unwrap(),
            container_info: serde_json::from_value::<ContainerInfo>(info).unwrap(),
        }
    }

    fn free_port() -> u16 {
        // The legacy path also binds port + 1, so find a free pair.
        loop {
            let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
            let port = listener.local_addr().unwrap().port();
            let Some(next) = port.checked_add(1) else {
                continue;
            };
            if TcpListener::bind(("127.0.0.1", next)).is_ok() {
                return port;
            }
        }
    }

    #[tokio::test]
    async fn control_task_without_container_id_fails() {
        let engine = Arc::new(FakeEngine::default());
        let result = processor(engine)
            .process(&assignment(1, json!({"operation": "stop"}), json!({})))
            .await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(
            result.error_message.as_deref(),
            Some("Missing container_id in control task")
        );
    }

    #[tokio::test]
    async fn stop_remove_of_absent_container_completes() {
        let engine = Arc::new(FakeEngine::default());
        let result = processor(engine)
            .process(&assignment(
                1,
                json!({"operation": "stop_remove", "container_id": "gone"}),
                json!({}),
            ))
            .await;
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.container_id, "gone");
    }

    #[tokio::test]
    async fn stop_engine_failure_is_reported() {
        let engine = Arc::new(FakeEngine::default());
        engine.add_container("task_1", "cid-1", true);
        engine.fail_stops();
        let result = processor(engine)
            .process(&assignment(
                1,
                json!({"operation": "stop", "container_id": "cid-1"}),
                json!({}),
            ))
            .await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.error_message.as_deref(), Some("stop failed"));
    }

    #[tokio::test]
    async fn start_without_image_fails() {
        let engine = Arc::new(FakeEngine::default());
        let result = processor(engine)
            .process(&assignment(
                1,
                json!({}),
                json!({"ssh_password": "pw", "ssh_port": free_port()}),
            ))
            .await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(
            result.error_message.as_deref(),
            Some("docker_image not specified in task")
        );
    }

    #[tokio::test]
    async fn start_without_credentials_fails() {
        let engine = Arc::new(FakeEngine::default());
        engine.add_local_image("ubuntu:22.04");
        let result = processor(engine)
            .process(&assignment(
                1,
                json!({"docker_image": "ubuntu:22.04"}),
                json!({}),
            ))
            .await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(
            result.error_message.as_deref(),
            Some("ssh_password and ssh_port are required for task")
        );
    }

    #[tokio::test]
    async fn start_launches_container_with_translated_resources() {
        let engine = Arc::new(FakeEngine::default());
        engine.add_local_image("ubuntu:22.04");
        let port = free_port();
        let result = processor(engine.clone())
            .process(&assignment(
                1,
                json!({"docker_image": "ubuntu:22.04", "ram_allocated_gb": 8}),
                json!({
                    "ssh_password": "pw",
                    "ssh_host": "198.51.100.7",
                    "port_mapping": {(port.to_string()): 22}
                }),
            ))
            .await;

        assert_eq!(result.status, TaskStatus::Running);
        assert_eq!(result.container_name.as_deref(), Some("task_1"));
        assert_eq!(result.ssh_port, Some(port));
        assert_eq!(
            result.ssh_command.as_deref(),
            Some(format!("ssh root@198.51.100.7 -p {}", port).as_str())
        );

        let spec = engine.last_spec().unwrap();
        assert_eq!(spec.volume, "task_1-work");
        assert_eq!(spec.params.memory_gb, Some(8));
        assert_eq!(spec.params.memory_swap_gb, Some(8));
        assert_eq!(spec.params.shm_size_gb, Some(4));

        let resources = result.allocated_resources.unwrap();
        assert_eq!(resources.ram_gb, Some(8));
        assert!(!resources.gpu_support);
    }

    #[tokio::test]
    async fn replayed_start_converges_without_second_launch() {
        let engine = Arc::new(FakeEngine::default());
        engine.add_local_image("ubuntu:22.04");
        let port = free_port();
        let task = assignment(
            1,
            json!({"docker_image": "ubuntu:22.04"}),
            json!({"ssh_password": "pw", "ssh_port": port}),
        );
        let processor = processor(engine.clone());

        let first = processor.process(&task).await;
        let second = processor.process(&task).await;

        assert_eq!(first.status, TaskStatus::Running);
        assert_eq!(second.status, TaskStatus::Running);
        assert_eq!(first.container_id, second.container_id);
        assert_eq!(engine.call_count(&EngineCall::Run), 1);
        assert_eq!(engine.call_count(&EngineCall::CreateVolume), 1);
    }

    #[tokio::test]
    async fn legacy_path_publishes_ssh_and_jupyter_ports() {
        let engine = Arc::new(FakeEngine::default());
        engine.add_local_image("ubuntu:22.04");
        let port = free_port();
        let result = processor(engine.clone())
            .process(&assignment(
                2,
                json!({"docker_image": "ubuntu:22.04"}),
                json!({"ssh_password": "pw", "ssh_port": port}),
            ))
            .await;

        assert_eq!(result.status, TaskStatus::Running);
        let mapping = engine.last_spec().unwrap().port_mapping;
        assert_eq!(mapping.get(&port), Some(&22));
        assert_eq!(mapping.get(&(port + 1)), Some(&8888));
    }
}
