pub(crate) mod gpu;
mod hardware;

pub use gpu::passthrough_available;
pub use hardware::Monitor;
