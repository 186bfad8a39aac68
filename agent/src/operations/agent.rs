use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::console::Console;
use crate::docker::{ContainerEngine, DockerEngine, InstanceController};
use crate::identity::IdentityStore;
use crate::monitor::{self, Monitor};
use crate::operations::{HeartbeatService, PollerService, TaskProcessor};
use crate::TaskHandles;

/// Top-level agent lifecycle: registration, engine setup and the two
/// long-running services (poller and heartbeat).
pub struct Agent {
    client: Arc<ApiClient>,
    identity: IdentityStore,
    monitor: Arc<Monitor>,
    cancellation_token: CancellationToken,
    task_handles: TaskHandles,
}

impl Agent {
    pub fn new(
        api_url: String,
        secret_key: String,
        state_dir: Option<String>,
        cancellation_token: CancellationToken,
        task_handles: TaskHandles,
    ) -> Result<Self> {
        Ok(Self {
            client: Arc::new(ApiClient::new(api_url, secret_key)),
            identity: IdentityStore::new(state_dir),
            monitor: Arc::new(Monitor::new()),
            cancellation_token,
            task_handles,
        })
    }

    pub async fn run(&self) -> Result<()> {
        Console::title("Compute Agent");

        if let Some(agent_id) = self.identity.load() {
            info!("Resuming with persisted agent id {}", agent_id);
            self.client.set_agent_id(agent_id).await;
        }

        Console::section("Container Engine");
        let engine = Arc::new(self.initialize_engine().await?);
        Console::success("Container engine is reachable");

        let gpu_runtime = monitor::passthrough_available();
        if gpu_runtime {
            Console::success("GPU passthrough available");
        } else {
            Console::warning("GPU passthrough unavailable, tasks run CPU-only");
        }

        Console::section("Registration");
        let snapshot = self.monitor.collect_snapshot().await;
        if self.client.agent_id().await.is_none() {
            let agent_id = self
                .client
                .confirm(&snapshot)
                .await
                .context("failed to confirm agent with the control plane")?;
            if let Err(err) = self.identity.save(&agent_id) {
                warn!("Could not persist agent id: {}", err);
            }
            self.client.send_log("agent confirmed").await;
            Console::success(&format!("Registered as agent {}", agent_id));
        } else {
            Console::success("Already registered");
        }
        if let Err(err) = self.client.send_init(&snapshot).await {
            warn!("Failed to upload hardware snapshot: {}", err);
        }

        let controller = InstanceController::new(engine, gpu_runtime);
        let processor = Arc::new(TaskProcessor::new(controller, self.client.clone()));
        let poller = PollerService::new(self.client.clone(), processor);
        poller
            .start(self.cancellation_token.clone(), self.task_handles.clone())
            .await;
        self.client.send_log("polling started").await;
        Console::section("Serving");
        Console::info("Status", "polling for tasks");

        HeartbeatService::new(self.client.clone())
            .run(self.cancellation_token.clone(), self.monitor.clone())
            .await;

        self.client.send_log("agent stopped").await;
        Ok(())
    }

    async fn initialize_engine(&self) -> Result<DockerEngine> {
        match connect_engine().await {
            Ok(engine) => Ok(engine),
            Err(err) => {
                warn!("Container engine unreachable ({}), attempting repair", err);
                repair_engine_permissions().await;
                connect_engine()
                    .await
                    .context("container engine is required but not available")
            }
        }
    }
}

async fn connect_engine() -> Result<DockerEngine> {
    let engine = DockerEngine::new()?;
    engine.ping().await?;
    Ok(engine)
}

/// Best-effort recovery for the two common dockerd failure modes: the
/// current user missing from the docker group and a wedged daemon.
async fn repair_engine_permissions() {
    let user = std::env::var("USER").unwrap_or_default();
    if !user.is_empty() {
        let result = tokio::process::Command::new("sudo")
            .args(["usermod", "-aG", "docker", &user])
            .status()
            .await;
        if let Err(err) = result {
            warn!("Could not add {} to the docker group: {}", user, err);
        }
    }
    let result = tokio::process::Command::new("sudo")
        .args(["systemctl", "restart", "docker"])
        .status()
        .await;
    if let Err(err) = result {
        warn!("Could not restart the docker daemon: {}", err);
    }
    tokio::time::sleep(Duration::from_secs(3)).await;
}
