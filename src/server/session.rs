use std::sync::Arc;
use std::time::Duration;

use natt_reliable::{KcpListener, KcpStream};

use crate::relay::{dial_tcp, relay};
use crate::server::state::{RuntimeState, SessionGuard};

pub(crate) struct SessionTarget {
    pub target: String,
    pub connect_timeout: Duration,
}

pub(crate) async fn accept_loop(
    listener: Arc<KcpListener>,
    state: Arc<RuntimeState>,
    target: Arc<SessionTarget>,
) {
    loop {
        let stream = match listener.accept().await {
            Ok(stream) => stream,
            Err(e) => {
                if listener.is_closed() {
                    log::debug!("listener {} closed, accept loop exits", listener.local_addr());
                    return;
                }
                log::warn!("accept on {}: {e}", listener.local_addr());
                continue;
            }
        };
        spawn_session(stream, &state, &target);
    }
}

pub(crate) fn spawn_session(stream: KcpStream, state: &Arc<RuntimeState>, target: &Arc<SessionTarget>) {
    let guard = state.session_started();
    log::info!(
        "session from {} accepted, {} active",
        stream.remote_addr(),
        state.active_sessions()
    );
    tokio::spawn(handle_session(guard, stream, target.clone()));
}

async fn handle_session(guard: SessionGuard, stream: KcpStream, target: Arc<SessionTarget>) {
    let remote_addr = stream.remote_addr();
    let local = match dial_tcp(&target.target, target.connect_timeout).await {
        Ok(local) => local,
        Err(e) => {
            log::warn!("session from {remote_addr}: {e}");
            return;
        }
    };
    if let Err(e) = relay(stream, local).await {
        log::warn!("session from {remote_addr}: {e}");
    }
    drop(guard);
}
