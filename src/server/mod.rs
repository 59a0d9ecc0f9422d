//! Tunnel server: discovers the external mapping of its UDP port, publishes
//! it, relays every inbound KCP session to a local TCP service and
//! re-verifies the mapping after long idle periods.

use std::sync::Arc;

use async_shutdown::ShutdownManager;
use natt_core::directory::{publish, Directory};
use natt_core::stun::{Discovery, EndpointDiscovery};
use natt_reliable::KcpListener;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::server::session::{accept_loop, spawn_session, SessionTarget};
use crate::server::state::RuntimeState;
pub use crate::server::state::{ServerPhase, ServerStats};

mod maintain;
mod session;
mod state;

#[derive(Clone)]
pub struct TunnelServer {
    inner: Arc<ServerInner>,
}

struct AcceptLoop {
    shutdown_manager: ShutdownManager<()>,
    task: JoinHandle<()>,
}

pub(crate) struct ServerInner {
    pub(crate) config: ServerConfig,
    pub(crate) state: Arc<RuntimeState>,
    discovery: Arc<dyn EndpointDiscovery>,
    directory: Arc<dyn Directory>,
    target: Arc<SessionTarget>,
    shutdown_manager: ShutdownManager<()>,
    accept_loop: Mutex<Option<AcceptLoop>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl TunnelServer {
    pub fn new(
        config: ServerConfig,
        discovery: Arc<dyn EndpointDiscovery>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        let target = Arc::new(SessionTarget {
            target: config.target.clone(),
            connect_timeout: config.connect_timeout,
        });
        let state = Arc::new(RuntimeState::new(config.bind.port));
        Self {
            inner: Arc::new(ServerInner {
                config,
                state,
                discovery,
                directory,
                target,
                shutdown_manager: ShutdownManager::new(),
                accept_loop: Mutex::new(None),
                monitor: Mutex::new(None),
            }),
        }
    }

    /// Discovers, publishes and starts listening.
    ///
    /// With a dynamic bind the probe picks the port and the listener takes the
    /// same number; with a pinned bind the probe is sent from that port. Any
    /// failure here is fatal and leaves nothing running.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        inner.config.check()?;
        if inner.state.phase() != ServerPhase::Created {
            return Err(Error::Config("server already started".into()));
        }
        let pinned = (!inner.config.bind.is_dynamic()).then_some(inner.config.bind.port);
        let discovery = match inner.discover_and_publish(pinned).await {
            Ok(discovery) => discovery,
            Err(e) => {
                inner.state.set_phase(ServerPhase::Closed);
                return Err(e);
            }
        };
        let listener = match inner.bind(discovery.local_port).await {
            Ok(listener) => listener,
            Err(e) => {
                inner.state.set_phase(ServerPhase::Closed);
                return Err(e);
            }
        };
        log::info!(
            "listening on {}, reachable at {}",
            listener.local_addr(),
            discovery.external
        );
        inner.state.set_listener(listener.clone());
        inner.start_accept_loop(listener);
        inner.state.set_phase(ServerPhase::Listening);
        let monitor = maintain::start_task(&inner.shutdown_manager, Arc::downgrade(&self.inner));
        inner.monitor.lock().replace(monitor);
        Ok(())
    }

    /// Stops the monitor and the accept loop and releases the port. Sessions
    /// already relaying keep their streams until they end. Idempotent.
    pub async fn close(&self) {
        let inner = &self.inner;
        _ = inner.shutdown_manager.trigger_shutdown(());
        let monitor = inner.monitor.lock().take();
        if let Some(monitor) = monitor {
            _ = monitor.await;
        }
        inner.stop_accept_loop().await;
        if let Some(listener) = inner.state.take_listener() {
            listener.close().await;
            log::info!("listener {} closed", listener.local_addr());
        }
        inner.state.set_phase(ServerPhase::Closed);
    }

    pub fn stats(&self) -> ServerStats {
        self.inner.state.stats()
    }

    pub fn local_port(&self) -> u16 {
        self.inner.state.local_port()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown_manager.is_shutdown_triggered()
    }

    pub async fn wait_closed(&self) {
        self.inner.shutdown_manager.wait_shutdown_triggered().await;
    }
}

impl ServerInner {
    async fn discover_and_publish(&self, local_port: Option<u16>) -> Result<Discovery> {
        self.state.set_phase(ServerPhase::Discovering);
        let discovery = self.discovery.discover(local_port).await?;
        log::info!(
            "local port {} maps to {}",
            discovery.local_port,
            discovery.external
        );
        self.state.set_phase(ServerPhase::Publishing);
        publish(self.directory.as_ref(), &self.config.fqdn, discovery.external).await?;
        self.state.set_published(discovery.external);
        Ok(discovery)
    }

    async fn bind(&self, port: u16) -> Result<Arc<KcpListener>> {
        let addr = self.config.bind.with_port(port);
        let listener = KcpListener::bind(addr, self.config.kcp.clone()).await?;
        Ok(Arc::new(listener))
    }

    fn start_accept_loop(&self, listener: Arc<KcpListener>) {
        if self.shutdown_manager.is_shutdown_triggered() {
            return;
        }
        let shutdown_manager = ShutdownManager::<()>::new();
        let fut = shutdown_manager.wrap_cancel(accept_loop(
            listener,
            self.state.clone(),
            self.target.clone(),
        ));
        let task = tokio::spawn(async move {
            if fut.await.is_err() {
                log::debug!("recv shutdown signal: accept loop is shutdown");
            }
        });
        let old = self.accept_loop.lock().replace(AcceptLoop {
            shutdown_manager,
            task,
        });
        if let Some(old) = old {
            _ = old.shutdown_manager.trigger_shutdown(());
        }
    }

    async fn stop_accept_loop(&self) {
        let accept_loop = self.accept_loop.lock().take();
        if let Some(accept_loop) = accept_loop {
            _ = accept_loop.shutdown_manager.trigger_shutdown(());
            _ = accept_loop.task.await;
        }
    }

    /// Re-runs discover, publish and bind on the current port.
    ///
    /// Accepting stops before the listener is replaced, and sessions the old
    /// listener already queued are served instead of refused. The listener is
    /// re-bound even when discovery or publication fails, so the server keeps
    /// serving under its last published record.
    pub(crate) async fn rediscover(&self) -> Result<()> {
        self.stop_accept_loop().await;
        if self.shutdown_manager.is_shutdown_triggered() {
            return Ok(());
        }
        if let Some(listener) = self.state.listener() {
            // closing the listener would refuse sessions it already queued.
            // One opened between this drain and the close below is still lost.
            while let Some(stream) = listener.try_accept() {
                spawn_session(stream, &self.state, &self.target);
            }
        }
        if self.state.active_sessions() > 0 {
            log::info!("a session started meanwhile, keeping the current mapping");
            if let Some(listener) = self.state.listener() {
                self.start_accept_loop(listener);
            }
            return Ok(());
        }
        self.state.set_phase(ServerPhase::Rediscovering);
        let port = self.state.local_port();
        if let Some(old) = self.state.take_listener() {
            old.close().await;
        }

        let rs = self.discover_and_publish(Some(port)).await;

        // without a listener the phase stays Rediscovering until a later
        // tick binds again
        let listener = self.bind(port).await?;
        if self.shutdown_manager.is_shutdown_triggered() {
            listener.close().await;
            return Ok(());
        }
        log::info!("listener {} restarted", listener.local_addr());
        self.state.set_listener(listener.clone());
        self.start_accept_loop(listener);
        self.state.set_phase(ServerPhase::Listening);
        rs?;
        self.state.reset_idle();
        Ok(())
    }
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        _ = self.shutdown_manager.trigger_shutdown(());
        if let Some(accept_loop) = self.accept_loop.get_mut().take() {
            _ = accept_loop.shutdown_manager.trigger_shutdown(());
        }
    }
}
