use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

const STATE_FILENAME: &str = "agent_id.toml";

#[derive(Serialize, Deserialize)]
struct PersistedIdentity {
    agent_id: String,
}

/// Persists the confirmed agent id across restarts so the agent keeps the
/// same identity and the control plane keeps task history attached to it.
pub struct IdentityStore {
    state_dir: Option<PathBuf>,
}

impl IdentityStore {
    pub fn new(state_dir: Option<String>) -> Self {
        Self {
            state_dir: state_dir.map(PathBuf::from),
        }
    }

    fn state_path(&self) -> Option<PathBuf> {
        let dir = match &self.state_dir {
            Some(dir) => dir.clone(),
            None => ProjectDirs::from("com", "gpugo", "agent")?
                .data_local_dir()
                .to_path_buf(),
        };
        Some(dir.join(STATE_FILENAME))
    }

    /// Returns the stored agent id, or `None` if no valid state exists.
    pub fn load(&self) -> Option<String> {
        let path = self.state_path()?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(_) => {
                debug!("No persisted identity at {:?}", path);
                return None;
            }
        };
        match toml::from_str::<PersistedIdentity>(&contents) {
            Ok(state) => Some(state.agent_id),
            Err(err) => {
                warn!("Ignoring unreadable identity file {:?}: {}", path, err);
                None
            }
        }
    }

    pub fn save(&self, agent_id: &str) -> Result<()> {
        let path = self
            .state_path()
            .context("could not determine a state directory for the agent identity")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create state directory {:?}", parent))?;
        }
        let state = PersistedIdentity {
            agent_id: agent_id.to_string(),
        };
        let contents = toml::to_string(&state)?;
        fs::write(&path, contents)
            .with_context(|| format!("failed to write identity file {:?}", path))?;
        debug!("Persisted agent id to {:?}", path);
        Ok(())
    }
}
