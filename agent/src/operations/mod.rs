mod agent;
mod heartbeat;
mod poller;
mod processor;

pub use agent::Agent;
pub use heartbeat::HeartbeatService;
pub use poller::PollerService;
pub use processor::TaskProcessor;
