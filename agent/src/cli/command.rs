use anyhow::Result;
use clap::Subcommand;
use tokio_util::sync::CancellationToken;

use crate::console::Console;
use crate::operations::Agent;
use crate::TaskHandles;

#[derive(Subcommand)]
pub enum Commands {
    /// Register with the control plane and serve container tasks
    Run {
        /// Secret key issued for this host
        secret_key: String,

        /// Control-plane base URL
        #[arg(long, default_value = "https://api.gpugo.ru")]
        api_url: String,

        /// Override the directory used to persist the agent identity
        #[arg(long)]
        state_dir: Option<String>,

        /// Optional Loki endpoint for log shipping
        #[arg(long)]
        loki_url: Option<String>,

        /// Log level (error, warn, info, debug, trace)
        #[arg(long)]
        log_level: Option<String>,
    },
}

pub async fn execute_command(
    command: &Commands,
    cancellation_token: CancellationToken,
    task_handles: TaskHandles,
) -> Result<()> {
    match command {
        Commands::Run {
            secret_key,
            api_url,
            state_dir,
            ..
        } => {
            let agent = Agent::new(
                api_url.clone(),
                secret_key.clone(),
                state_dir.clone(),
                cancellation_token,
                task_handles,
            )?;
            let result = agent.run().await;
            if let Err(err) = &result {
                Console::error(&format!("Agent terminated: {err:#}"));
            }
            result
        }
    }
}
