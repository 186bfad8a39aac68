mod controller;
mod engine;
#[cfg(test)]
pub(crate) mod testing;

pub use controller::{InstanceController, LaunchError, SessionCredentials};
pub use engine::{ContainerEngine, DockerEngine, EngineError, LaunchSpec};
