use std::net::TcpListener;

use shared::models::task::TaskId;

#[derive(Debug, thiserror::Error)]
#[error("host ports already in use: {}", .0.iter().map(u16::to_string).collect::<Vec<_>>().join(", "))]
pub struct PortsInUse(pub Vec<u16>);

/// Deterministic container name for a task. Replays of the same task map
/// to the same container.
pub fn container_name(task_id: &TaskId) -> String {
    format!("task_{}", task_id)
}

fn port_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Checks every requested host port and reports all conflicts at once so a
/// single retry cannot trade one occupied port for another.
///
/// The check is advisory: another process can bind a port between this
/// probe and the engine invocation, in which case the launch fails with an
/// engine error. That check-then-act race is an accepted limitation, no
/// lock is held across the two steps.
pub fn assert_ports_free<I>(ports: I) -> Result<(), PortsInUse>
where
    I: IntoIterator<Item = u16>,
{
    let mut busy: Vec<u16> = ports.into_iter().filter(|port| !port_free(*port)).collect();
    if busy.is_empty() {
        return Ok(());
    }
    busy.sort_unstable();
    busy.dedup();
    Err(PortsInUse(busy))
}
