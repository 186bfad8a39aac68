mod allocator;
mod translator;

pub use allocator::{assert_ports_free, container_name, PortsInUse};
pub use translator::RuntimeParams;
