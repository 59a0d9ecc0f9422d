use std::sync::Weak;

use async_shutdown::ShutdownManager;
use tokio::task::JoinHandle;

use crate::server::ServerInner;

pub(crate) mod idle;

/// Runs the maintain loops until the server shuts down. Awaiting the returned
/// handle after shutdown guarantees no loop is still touching the server.
pub(crate) fn start_task(
    shutdown_manager: &ShutdownManager<()>,
    server: Weak<ServerInner>,
) -> JoinHandle<()> {
    let fut = shutdown_manager.wrap_cancel(idle::idle_monitor_loop(server));
    tokio::spawn(async move {
        if fut.await.is_err() {
            log::debug!("recv shutdown signal: maintain tasks are shutdown");
        }
    })
}
