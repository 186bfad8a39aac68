use std::time::Duration;

use log::{debug, warn};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;

use shared::models::api::{ApiResponse, ConfirmData};
use shared::models::heartbeat::HeartbeatRequest;
use shared::models::hardware::HostSnapshot;
use shared::models::task::{PullData, StatusUpdate, TaskAssignment, TaskId};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const LOG_TIMEOUT: Duration = Duration::from_secs(5);

const AUTH_HEADER: &str = "X-Agent-Secret-Key";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server rejected request: {0}")]
    Server(String),
    #[error("agent is not registered yet")]
    NotRegistered,
}

/// Client for the control-plane HTTP API. Every authenticated call carries
/// the host secret key; agent-scoped calls additionally require a confirmed
/// agent id.
pub struct ApiClient {
    base_url: String,
    secret_key: String,
    agent_id: RwLock<Option<String>>,
    client: Client,
}

impl ApiClient {
    pub fn new(base_url: String, secret_key: String) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key,
            agent_id: RwLock::new(None),
            client,
        }
    }

    pub async fn set_agent_id(&self, agent_id: String) {
        *self.agent_id.write().await = Some(agent_id);
    }

    pub async fn agent_id(&self) -> Option<String> {
        self.agent_id.read().await.clone()
    }

    async fn require_agent_id(&self) -> Result<String, ApiError> {
        self.agent_id.read().await.clone().ok_or(ApiError::NotRegistered)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header(AUTH_HEADER, &self.secret_key)
            .json(body)
            .send()
            .await?;
        let envelope: ApiResponse<T> = response.json().await?;
        if !envelope.is_ok() {
            return Err(ApiError::Server(envelope.message().to_string()));
        }
        Ok(envelope)
    }

    /// Exchange the secret key for this host's agent id.
    pub async fn confirm(&self, snapshot: &HostSnapshot) -> Result<String, ApiError> {
        let envelope: ApiResponse<ConfirmData> = self.post("/v1/agents/confirm", snapshot).await?;
        let agent_id = envelope
            .data
            .as_ref()
            .and_then(ConfirmData::agent_id)
            .ok_or_else(|| ApiError::Server("confirm response missing agent id".to_string()))?;
        self.set_agent_id(agent_id.clone()).await;
        Ok(agent_id)
    }

    /// Upload the full hardware snapshot after registration.
    pub async fn send_init(&self, snapshot: &HostSnapshot) -> Result<(), ApiError> {
        let agent_id = self.require_agent_id().await?;
        let path = format!("/v1/agents/{}/init", agent_id);
        let _: ApiResponse<serde_json::Value> = self.post(&path, snapshot).await?;
        Ok(())
    }

    /// Ask the control plane for the next task. `Ok(None)` means no work.
    pub async fn pull_task(&self) -> Result<Option<TaskAssignment>, ApiError> {
        let agent_id = self.require_agent_id().await?;
        let path = format!("/v1/agents/{}/tasks/pull", agent_id);
        let envelope: ApiResponse<PullData> = self.post(&path, &json!({})).await?;
        Ok(envelope.data.and_then(PullData::into_assignment))
    }

    pub async fn send_status(
        &self,
        task_id: &TaskId,
        update: &StatusUpdate,
    ) -> Result<(), ApiError> {
        let agent_id = self.require_agent_id().await?;
        let path = format!("/v1/agents/{}/tasks/{}/status", agent_id, task_id);
        let _: ApiResponse<serde_json::Value> = self.post(&path, update).await?;
        Ok(())
    }

    pub async fn send_heartbeat(&self, heartbeat: &HeartbeatRequest) -> Result<(), ApiError> {
        let agent_id = self.require_agent_id().await?;
        let path = format!("/v1/agents/{}/heartbeat", agent_id);
        let _: ApiResponse<serde_json::Value> = self.post(&path, heartbeat).await?;
        Ok(())
    }

    /// Ship an operational log line to the control plane. Best effort: any
    /// failure is swallowed so logging can never break the agent.
    pub async fn send_log(&self, message: &str) {
        let Some(agent_id) = self.agent_id().await else {
            debug!("Skipping remote log, agent not registered: {}", message);
            return;
        };
        let url = format!("{}/v1/agents/{}/logs", self.base_url, agent_id);
        let body = json!({ "message": message });
        let result = self
            .client
            .post(&url)
            .timeout(LOG_TIMEOUT)
            .json(&body)
            .send()
            .await;
        if let Err(err) = result {
            warn!("Failed to ship log to control plane: {}", err);
        }
    }
}
