use std::collections::BTreeMap;
use std::sync::Arc;

use log::{error, info, warn};

use crate::docker::engine::{ContainerEngine, EngineError, LaunchSpec};
use crate::resources::{assert_ports_free, PortsInUse, RuntimeParams};

const NVIDIA_CAPS: &str = "compute,utility";

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    PortsInUse(#[from] PortsInUse),
    #[error("image {image} is unavailable: {reason}")]
    ImageUnavailable { image: String, reason: String },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Secrets injected into a rental container at creation time.
pub struct SessionCredentials {
    pub ssh_password: String,
    pub jupyter_token: String,
}

/// Idempotent lifecycle operations over a [`ContainerEngine`]. Each task id
/// maps to exactly one container, so replaying an assignment converges on
/// the already-running container instead of creating a duplicate.
pub struct InstanceController<E> {
    engine: Arc<E>,
    gpu_runtime: bool,
}

impl<E: ContainerEngine> InstanceController<E> {
    pub fn new(engine: Arc<E>, gpu_runtime: bool) -> Self {
        Self {
            engine,
            gpu_runtime,
        }
    }

    async fn exists(&self, name: &str) -> Result<bool, EngineError> {
        let names = self.engine.container_names(true).await?;
        Ok(names.iter().any(|n| n == name))
    }

    async fn is_running(&self, name: &str) -> Result<bool, EngineError> {
        let names = self.engine.container_names(false).await?;
        Ok(names.iter().any(|n| n == name))
    }

    /// Brings the named container up. Running containers are left alone,
    /// stopped ones are resumed with their original configuration, and only
    /// a genuinely new task creates a container.
    pub async fn start(
        &self,
        name: &str,
        image: &str,
        params: &RuntimeParams,
        port_mapping: &BTreeMap<u16, u16>,
        credentials: &SessionCredentials,
    ) -> Result<String, LaunchError> {
        if self.is_running(name).await? {
            info!("Container {} is already running, nothing to do", name);
            let id = self.engine.container_id(name).await?;
            return Ok(id.unwrap_or_else(|| name.to_string()));
        }

        if self.exists(name).await? {
            info!("Resuming stopped container {}", name);
            self.engine.start_container(name).await?;
            let id = self.engine.container_id(name).await?;
            return Ok(id.unwrap_or_else(|| name.to_string()));
        }

        assert_ports_free(port_mapping.keys().copied())?;

        if !self.engine.image_present(image).await? {
            self.engine
                .pull_image(image)
                .await
                .map_err(|err| LaunchError::ImageUnavailable {
                    image: image.to_string(),
                    reason: err.to_string(),
                })?;
        }

        let volume = format!("{}-work", name);
        self.engine.create_volume(&volume).await?;

        let gpu_devices = params
            .gpu_devices
            .clone()
            .unwrap_or_else(|| "all".to_string());
        let env = vec![
            ("SSH_PASSWORD".to_string(), credentials.ssh_password.clone()),
            ("JUPYTER_TOKEN".to_string(), credentials.jupyter_token.clone()),
            (
                "NVIDIA_DRIVER_CAPABILITIES".to_string(),
                NVIDIA_CAPS.to_string(),
            ),
            ("NVIDIA_VISIBLE_DEVICES".to_string(), gpu_devices),
        ];

        let spec = LaunchSpec {
            name: name.to_string(),
            image: image.to_string(),
            volume,
            port_mapping: port_mapping.clone(),
            env,
            params: params.clone(),
            gpu_runtime: self.gpu_runtime,
        };
        let id = self.engine.run_container(&spec).await?;
        Ok(id)
    }

    /// Stops a container, treating "already gone" and "already stopped" as
    /// success so a replayed stop converges.
    pub async fn stop_by_id(&self, container_id: &str) -> bool {
        match self.engine.stop_container(container_id).await {
            Ok(()) => {
                info!("Stopped container {}", container_id);
                true
            }
            Err(EngineError::NotFound) => {
                warn!("Container {} not found, treating stop as done", container_id);
                true
            }
            Err(EngineError::NotRunning) => {
                info!("Container {} already stopped", container_id);
                true
            }
            Err(err) => {
                error!("Failed to stop container {}: {}", container_id, err);
                false
            }
        }
    }

    /// Removes a container, treating "already gone" as success.
    pub async fn remove_by_id(&self, container_id: &str) -> bool {
        match self.engine.remove_container(container_id).await {
            Ok(()) => {
                info!("Removed container {}", container_id);
                true
            }
            Err(EngineError::NotFound) => {
                warn!(
                    "Container {} not found, treating removal as done",
                    container_id
                );
                true
            }
            Err(err) => {
                error!("Failed to remove container {}: {}", container_id, err);
                false
            }
        }
    }
}
