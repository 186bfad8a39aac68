use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::monitor::Monitor;

const TICK: Duration = Duration::from_secs(60);
const TICKS_PER_HEARTBEAT: u64 = 5;

/// Periodic liveness and utilization reporting. Runs on the caller's task
/// and only returns once the agent is shutting down. Heartbeat delivery is
/// best effort and never affects task processing.
pub struct HeartbeatService {
    client: Arc<ApiClient>,
}

impl HeartbeatService {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    pub async fn run(&self, cancellation_token: CancellationToken, monitor: Arc<Monitor>) {
        let mut interval = tokio::time::interval(TICK);
        // The first tick of a tokio interval completes immediately.
        interval.tick().await;

        let mut ticks: u64 = 0;
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("Heartbeat service shutting down");
                    return;
                }
                _ = interval.tick() => {}
            }

            ticks += 1;
            if ticks % TICKS_PER_HEARTBEAT != 0 {
                continue;
            }

            let heartbeat = monitor.collect_monitoring_data().await;
            match self.client.send_heartbeat(&heartbeat).await {
                Ok(()) => debug!("Heartbeat sent"),
                Err(err) => {
                    warn!("Failed to send heartbeat: {}", err);
                    self.client
                        .send_log(&format!("heartbeat delivery failed: {}", err))
                        .await;
                }
            }
        }
    }
}
