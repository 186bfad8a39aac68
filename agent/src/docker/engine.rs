use std::collections::{BTreeMap, HashMap};
use std::future::Future;

use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding, ResourcesUlimits, RestartPolicy, RestartPolicyNameEnum};
use bollard::volume::CreateVolumeOptions;
use bollard::Docker;
use futures_util::StreamExt;
use log::{debug, info};

use crate::resources::RuntimeParams;

const GB: i64 = 1024 * 1024 * 1024;
const ULIMIT_STACK: i64 = 67_108_864;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("container not found")]
    NotFound,
    #[error("container is not running")]
    NotRunning,
    #[error("{0}")]
    Other(String),
}

impl From<DockerError> for EngineError {
    fn from(err: DockerError) -> Self {
        match err {
            DockerError::DockerResponseServerError {
                status_code: 404, ..
            } => EngineError::NotFound,
            DockerError::DockerResponseServerError {
                status_code: 304, ..
            } => EngineError::NotRunning,
            other => EngineError::Other(other.to_string()),
        }
    }
}

/// Everything needed to create and start one rental container.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub name: String,
    pub image: String,
    /// Named volume mounted at /work inside the container.
    pub volume: String,
    /// host port -> container port
    pub port_mapping: BTreeMap<u16, u16>,
    pub env: Vec<(String, String)>,
    pub params: RuntimeParams,
    /// Route the container through the NVIDIA runtime.
    pub gpu_runtime: bool,
}

/// Seam between task processing and the container backend. The production
/// implementation talks to dockerd; tests substitute an in-memory fake.
pub trait ContainerEngine: Send + Sync {
    fn ping(&self) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Container names without the leading slash Docker prepends.
    fn container_names(
        &self,
        all: bool,
    ) -> impl Future<Output = Result<Vec<String>, EngineError>> + Send;

    fn container_id(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<String>, EngineError>> + Send;

    fn image_present(&self, image: &str) -> impl Future<Output = Result<bool, EngineError>> + Send;

    fn pull_image(&self, image: &str) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn create_volume(&self, name: &str) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Creates and starts a container, returning its id.
    fn run_container(
        &self,
        spec: &LaunchSpec,
    ) -> impl Future<Output = Result<String, EngineError>> + Send;

    fn start_container(&self, name: &str) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn stop_container(&self, id: &str) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn remove_container(&self, id: &str) -> impl Future<Output = Result<(), EngineError>> + Send;
}

pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn new() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_unix_defaults()?;
        Ok(Self { docker })
    }

    fn host_config(spec: &LaunchSpec) -> HostConfig {
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
            .port_mapping
            .iter()
            .map(|(host_port, container_port)| {
                (
                    format!("{}/tcp", container_port),
                    Some(vec![PortBinding {
                        host_ip: Some("0.0.0.0".to_string()),
                        host_port: Some(host_port.to_string()),
                    }]),
                )
            })
            .collect();

        let params = &spec.params;
        HostConfig {
            binds: Some(vec![format!("{}:/work", spec.volume)]),
            port_bindings: Some(port_bindings),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
            runtime: spec.gpu_runtime.then(|| "nvidia".to_string()),
            ulimits: Some(vec![
                ResourcesUlimits {
                    name: Some("memlock".to_string()),
                    soft: Some(-1),
                    hard: Some(-1),
                },
                ResourcesUlimits {
                    name: Some("stack".to_string()),
                    soft: Some(ULIMIT_STACK),
                    hard: Some(ULIMIT_STACK),
                },
            ]),
            cpuset_cpus: params.cpuset_cpus.clone(),
            memory: params.memory_gb.map(|gb| gb * GB),
            memory_swap: params.memory_swap_gb.map(|gb| gb * GB),
            shm_size: params.shm_size_gb.map(|gb| gb * GB),
            storage_opt: params.storage_gb.filter(|gb| *gb > 0).map(|gb| {
                HashMap::from([("size".to_string(), format!("{}G", gb))])
            }),
            ..Default::default()
        }
    }
}

impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        self.docker.ping().await?;
        Ok(())
    }

    async fn container_names(&self, all: bool) -> Result<Vec<String>, EngineError> {
        let options = Some(ListContainersOptions::<String> {
            all,
            ..Default::default()
        });
        let containers = self.docker.list_containers(options).await?;
        let names = containers
            .iter()
            .flat_map(|c| c.names.iter().flatten())
            .map(|name| name.trim_start_matches('/').to_string())
            .collect();
        Ok(names)
    }

    async fn container_id(&self, name: &str) -> Result<Option<String>, EngineError> {
        match self.docker.inspect_container(name, None).await {
            Ok(details) => Ok(details.id),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn image_present(&self, image: &str) -> Result<bool, EngineError> {
        Ok(self.docker.inspect_image(image).await.is_ok())
    }

    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        info!("Pulling image {}", image);
        let (image_name, tag) = match image.split_once(':') {
            Some((name, tag)) => (name, tag),
            None => (image, "latest"),
        };
        let options = CreateImageOptions {
            from_image: image_name,
            tag,
            ..Default::default()
        };
        let mut image_stream = self.docker.create_image(Some(options), None, None);
        while let Some(info) = image_stream.next().await {
            match info {
                Ok(create_info) => debug!("Pull progress: {:?}", create_info),
                Err(e) => return Err(e.into()),
            }
        }
        info!("Successfully pulled image {}", image);
        Ok(())
    }

    async fn create_volume(&self, name: &str) -> Result<(), EngineError> {
        self.docker
            .create_volume(CreateVolumeOptions {
                name: name.to_string(),
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    async fn run_container(&self, spec: &LaunchSpec) -> Result<String, EngineError> {
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .port_mapping
            .values()
            .map(|container_port| (format!("{}/tcp", container_port), HashMap::new()))
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            exposed_ports: Some(exposed_ports),
            host_config: Some(Self::host_config(spec)),
            ..Default::default()
        };

        debug!("Creating container {}", spec.name);
        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await?;

        self.docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await?;
        info!("Container {} started with id {}", spec.name, container.id);
        Ok(container.id)
    }

    async fn start_container(&self, name: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker.stop_container(id, None).await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker.remove_container(id, None).await?;
        Ok(())
    }
}
