use std::sync::Weak;

use tokio::time::Instant;

use crate::server::ServerInner;

pub(crate) async fn idle_monitor_loop(server: Weak<ServerInner>) {
    let Some(period) = server.upgrade().map(|s| s.config.monitor_interval) else {
        return;
    };
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        interval.tick().await;
        let Some(server) = server.upgrade() else {
            return;
        };
        idle_tick(&server).await;
    }
}

/// One monitor tick. Re-verifies the published mapping when the server has
/// been without sessions for longer than the idle threshold; returns whether
/// it did.
pub(crate) async fn idle_tick(server: &ServerInner) -> bool {
    let threshold = server.config.idle_threshold;
    if !server.state.is_idle(threshold) {
        return false;
    }
    log::info!("no sessions for over {threshold:?}, verifying the published mapping");
    if let Err(e) = server.rediscover().await {
        server.state.set_degraded();
        log::warn!("rediscovery failed, retrying next tick: {e}");
    }
    true
}
