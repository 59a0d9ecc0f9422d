use std::sync::Arc;
use std::time::Duration;

use natt_core::Endpoint;
use natt_reliable::KcpListener;
use parking_lot::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    Created,
    Discovering,
    Publishing,
    Listening,
    Rediscovering,
    Closed,
}

/// Point-in-time view of a running server.
#[derive(Debug, Clone)]
pub struct ServerStats {
    pub phase: ServerPhase,
    pub local_port: u16,
    pub active_sessions: usize,
    pub last_session_end: Instant,
    pub published: Option<Endpoint>,
    /// The last re-discovery failed, the published record may be stale.
    pub degraded: bool,
}

struct Inner {
    phase: ServerPhase,
    local_port: u16,
    listener: Option<Arc<KcpListener>>,
    active_sessions: usize,
    last_session_end: Instant,
    published: Option<Endpoint>,
    degraded: bool,
}

/// Everything the accept loop, the session handlers and the monitor share.
pub(crate) struct RuntimeState {
    inner: RwLock<Inner>,
}

impl RuntimeState {
    pub fn new(local_port: u16) -> Self {
        Self {
            inner: RwLock::new(Inner {
                phase: ServerPhase::Created,
                local_port,
                listener: None,
                active_sessions: 0,
                last_session_end: Instant::now(),
                published: None,
                degraded: false,
            }),
        }
    }

    pub fn session_started(self: &Arc<Self>) -> SessionGuard {
        self.inner.write().active_sessions += 1;
        SessionGuard {
            state: self.clone(),
        }
    }

    fn session_ended(&self) -> usize {
        let mut guard = self.inner.write();
        guard.active_sessions = guard.active_sessions.saturating_sub(1);
        guard.last_session_end = Instant::now();
        guard.active_sessions
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.read().active_sessions
    }

    /// No session is running and none has ended for longer than `threshold`.
    pub fn is_idle(&self, threshold: Duration) -> bool {
        let guard = self.inner.read();
        guard.active_sessions == 0 && guard.last_session_end.elapsed() > threshold
    }

    pub fn reset_idle(&self) {
        self.inner.write().last_session_end = Instant::now();
    }

    pub fn phase(&self) -> ServerPhase {
        self.inner.read().phase
    }

    pub fn set_phase(&self, phase: ServerPhase) {
        self.inner.write().phase = phase;
    }

    pub fn local_port(&self) -> u16 {
        self.inner.read().local_port
    }

    /// Installs a freshly bound listener and the port it holds.
    pub fn set_listener(&self, listener: Arc<KcpListener>) -> Option<Arc<KcpListener>> {
        let mut guard = self.inner.write();
        guard.local_port = listener.local_addr().port();
        guard.listener.replace(listener)
    }

    pub fn listener(&self) -> Option<Arc<KcpListener>> {
        self.inner.read().listener.clone()
    }

    pub fn take_listener(&self) -> Option<Arc<KcpListener>> {
        self.inner.write().listener.take()
    }

    pub fn set_published(&self, endpoint: Endpoint) {
        let mut guard = self.inner.write();
        guard.published = Some(endpoint);
        guard.degraded = false;
    }

    pub fn set_degraded(&self) {
        self.inner.write().degraded = true;
    }

    pub fn stats(&self) -> ServerStats {
        let guard = self.inner.read();
        ServerStats {
            phase: guard.phase,
            local_port: guard.local_port,
            active_sessions: guard.active_sessions,
            last_session_end: guard.last_session_end,
            published: guard.published,
            degraded: guard.degraded,
        }
    }
}

/// Holds one slot of the active session count; releasing it records the end
/// of the session.
pub(crate) struct SessionGuard {
    state: Arc<RuntimeState>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let active = self.state.session_ended();
        log::info!("session closed, {active} active");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions_are_balanced() {
        let state = Arc::new(RuntimeState::new(41000));
        let before = state.stats().last_session_end;
        let first = state.session_started();
        let second = state.session_started();
        assert_eq!(state.active_sessions(), 2);
        // starting a session never moves the end time
        assert_eq!(state.stats().last_session_end, before);

        tokio::time::sleep(Duration::from_millis(5)).await;
        drop(second);
        assert_eq!(state.active_sessions(), 1);
        assert!(state.stats().last_session_end > before);
        drop(first);
        assert_eq!(state.active_sessions(), 0);
    }

    #[tokio::test]
    async fn idle_needs_no_sessions_and_a_stale_end() {
        let state = Arc::new(RuntimeState::new(41000));
        let threshold = Duration::from_millis(20);
        assert!(!state.is_idle(threshold));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(state.is_idle(threshold));

        let guard = state.session_started();
        // stale end time, but a session is running
        assert!(!state.is_idle(threshold));
        drop(guard);
        assert!(!state.is_idle(threshold));
    }
}
