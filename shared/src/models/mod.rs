pub mod api;
pub mod hardware;
pub mod heartbeat;
pub mod task;
