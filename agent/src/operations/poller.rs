use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use shared::models::task::{StatusUpdate, TaskStatus};

use crate::api::ApiClient;
use crate::docker::ContainerEngine;
use crate::operations::TaskProcessor;
use crate::TaskHandles;

const POLL_INTERVAL: Duration = Duration::from_secs(10);
const BACKOFF_INTERVAL: Duration = Duration::from_secs(60);
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

fn poll_delay(consecutive_errors: u32) -> Duration {
    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
        BACKOFF_INTERVAL
    } else {
        POLL_INTERVAL
    }
}

/// Pulls tasks from the control plane on a fixed cadence and reports each
/// outcome back. A streak of failing cycles slows the cadence down until a
/// clean cycle resets it.
pub struct PollerService<E> {
    client: Arc<ApiClient>,
    processor: Arc<TaskProcessor<E>>,
}

impl<E: ContainerEngine + 'static> PollerService<E> {
    pub fn new(client: Arc<ApiClient>, processor: Arc<TaskProcessor<E>>) -> Self {
        Self { client, processor }
    }

    pub async fn start(
        &self,
        cancellation_token: CancellationToken,
        task_handles: TaskHandles,
    ) {
        let client = self.client.clone();
        let processor = self.processor.clone();
        let handle = tokio::spawn(async move {
            let mut consecutive_errors: u32 = 0;
            loop {
                let clean = run_cycle(&client, &processor).await;
                if clean {
                    consecutive_errors = 0;
                } else {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    if consecutive_errors == MAX_CONSECUTIVE_ERRORS {
                        warn!(
                            "{} consecutive failing poll cycles, backing off to {:?}",
                            consecutive_errors, BACKOFF_INTERVAL
                        );
                    }
                }

                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Poller shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(poll_delay(consecutive_errors)) => {}
                }
            }
        });
        task_handles.lock().await.push(handle);
    }
}

/// One poll cycle. Returns `false` when the cycle should count against the
/// backoff streak.
async fn run_cycle<E: ContainerEngine>(
    client: &Arc<ApiClient>,
    processor: &Arc<TaskProcessor<E>>,
) -> bool {
    let task = match client.pull_task().await {
        Ok(Some(task)) => task,
        Ok(None) => {
            debug!("No task available");
            return true;
        }
        Err(err) => {
            error!("Failed to pull task: {}", err);
            return false;
        }
    };

    info!(
        "Task {} received, operation {}",
        task.id,
        task.task_data.operation()
    );
    client
        .send_log(&format!(
            "task received: id={} op={}",
            task.id,
            task.task_data.operation()
        ))
        .await;

    let result = processor.process(&task).await;
    let update = StatusUpdate::from(&result);
    let status_ok = match client.send_status(&task.id, &update).await {
        Ok(()) => true,
        Err(err) => {
            error!("Failed to report status for task {}: {}", task.id, err);
            false
        }
    };

    status_ok && result.status != TaskStatus::Failed
}
