use std::sync::Mutex;

use crate::docker::engine::{ContainerEngine, EngineError, LaunchSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Pull,
    CreateVolume,
    Run,
    Start,
    Stop,
    Remove,
}

#[derive(Debug, Clone)]
struct FakeContainer {
    name: String,
    id: String,
    running: bool,
}

#[derive(Default)]
struct FakeState {
    containers: Vec<FakeContainer>,
    local_images: Vec<String>,
    pullable_images: Vec<String>,
    volumes: Vec<String>,
    calls: Vec<EngineCall>,
    last_spec: Option<LaunchSpec>,
    next_id: u32,
    fail_stop: bool,
}

/// In-memory [`ContainerEngine`] for lifecycle tests.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn add_container(&self, name: &str, id: &str, running: bool) {
        self.state.lock().unwrap().containers.push(FakeContainer {
            name: name.to_string(),
            id: id.to_string(),
            running,
        });
    }

    pub fn add_local_image(&self, image: &str) {
        self.state.lock().unwrap().local_images.push(image.to_string());
    }

    pub fn add_pullable_image(&self, image: &str) {
        self.state
            .lock()
            .unwrap()
            .pullable_images
            .push(image.to_string());
    }

    pub fn fail_stops(&self) {
        self.state.lock().unwrap().fail_stop = true;
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, call: &EngineCall) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| *c == call)
            .count()
    }

    pub fn volumes(&self) -> Vec<String> {
        self.state.lock().unwrap().volumes.clone()
    }

    pub fn last_spec(&self) -> Option<LaunchSpec> {
        self.state.lock().unwrap().last_spec.clone()
    }
}

impl ContainerEngine for FakeEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn container_names(&self, all: bool) -> Result<Vec<String>, EngineError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .filter(|c| all || c.running)
            .map(|c| c.name.clone())
            .collect())
    }

    async fn container_id(&self, name: &str) -> Result<Option<String>, EngineError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.id.clone()))
    }

    async fn image_present(&self, image: &str) -> Result<bool, EngineError> {
        let state = self.state.lock().unwrap();
        Ok(state.local_images.iter().any(|i| i == image))
    }

    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::Pull);
        if state.pullable_images.iter().any(|i| i == image) {
            state.local_images.push(image.to_string());
            Ok(())
        } else {
            Err(EngineError::Other(format!("pull access denied for {}", image)))
        }
    }

    async fn create_volume(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::CreateVolume);
        if !state.volumes.iter().any(|v| v == name) {
            state.volumes.push(name.to_string());
        }
        Ok(())
    }

    async fn run_container(&self, spec: &LaunchSpec) -> Result<String, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::Run);
        state.next_id += 1;
        let id = format!("cid-{}", state.next_id);
        state.containers.push(FakeContainer {
            name: spec.name.clone(),
            id: id.clone(),
            running: true,
        });
        state.last_spec = Some(spec.clone());
        Ok(id)
    }

    async fn start_container(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::Start);
        match state.containers.iter_mut().find(|c| c.name == name) {
            Some(container) => {
                container.running = true;
                Ok(())
            }
            None => Err(EngineError::NotFound),
        }
    }

    async fn stop_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::Stop);
        if state.fail_stop {
            return Err(EngineError::Other("daemon timeout".to_string()));
        }
        match state.containers.iter_mut().find(|c| c.id == id) {
            Some(container) if container.running => {
                container.running = false;
                Ok(())
            }
            Some(_) => Err(EngineError::NotRunning),
            None => Err(EngineError::NotFound),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::Remove);
        match state.containers.iter().position(|c| c.id == id) {
            Some(index) if !state.containers[index].running => {
                state.containers.remove(index);
                Ok(())
            }
            Some(_) => Err(EngineError::Other("container is running".to_string())),
            None => Err(EngineError::NotFound),
        }
    }
}
