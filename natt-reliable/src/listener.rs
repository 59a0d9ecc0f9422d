use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_shutdown::ShutdownManager;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::config::{KcpConfig, SESSION_QUEUE};
use crate::kcp::KcpHandle;
use crate::stream::KcpStream;

/// Accepts KCP sessions arriving on one UDP port.
///
/// ```rust,no_run
/// use natt_reliable::{KcpConfig, KcpListener};
///
/// # #[tokio::main]
/// # async fn main() -> std::io::Result<()> {
/// let listener = KcpListener::bind("0.0.0.0:41000".parse().unwrap(), KcpConfig::default()).await?;
/// while let Ok(stream) = listener.accept().await {
///     println!("session from {}", stream.remote_addr());
/// }
/// # Ok(())
/// # }
/// ```
pub struct KcpListener {
    local_addr: SocketAddr,
    shutdown_manager: ShutdownManager<()>,
    receiver: flume::Receiver<KcpStream>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl KcpListener {
    pub async fn bind(addr: SocketAddr, config: KcpConfig) -> io::Result<KcpListener> {
        let socket = Arc::new(natt_core::socket::bind_udp(addr)?);
        let local_addr = socket.local_addr()?;
        let shutdown_manager = ShutdownManager::<()>::new();
        let (sender, receiver) = flume::bounded(SESSION_QUEUE);
        let handle = KcpHandle::new(local_addr, Arc::downgrade(&socket), config, sender);
        let recv = shutdown_manager.wrap_cancel(handle_udp(socket, handle));
        let recv_task = tokio::spawn(async move {
            match recv.await {
                Ok(Err(e)) => log::warn!("kcp listener {local_addr}: {e:?}"),
                Ok(Ok(())) => {}
                Err(_) => log::debug!("kcp listener {local_addr} closed"),
            }
        });
        log::debug!("kcp listening on {local_addr}");
        Ok(KcpListener {
            local_addr,
            shutdown_manager,
            receiver,
            recv_task: Mutex::new(Some(recv_task)),
        })
    }

    /// Waits for the next inbound session. Fails once the listener is closed.
    pub async fn accept(&self) -> io::Result<KcpStream> {
        tokio::select! {
            rs = self.receiver.recv_async() => {
                rs.map_err(|_| io::Error::new(io::ErrorKind::NotConnected, "listener closed"))
            }
            _ = self.shutdown_manager.wait_shutdown_triggered() => {
                Err(io::Error::new(io::ErrorKind::NotConnected, "listener closed"))
            }
        }
    }

    /// Takes a session that is already queued, without waiting.
    pub fn try_accept(&self) -> Option<KcpStream> {
        self.receiver.try_recv().ok()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown_manager.is_shutdown_triggered()
    }

    /// Stops receiving and releases the UDP port before returning.
    ///
    /// Sessions still riding on the port lose their datagram source and end.
    pub async fn close(&self) {
        _ = self.shutdown_manager.trigger_shutdown(());
        let recv_task = self.recv_task.lock().take();
        if let Some(recv_task) = recv_task {
            if let Err(e) = recv_task.await {
                log::warn!("kcp listener {} recv task: {e:?}", self.local_addr);
            }
        }
    }
}

impl Drop for KcpListener {
    fn drop(&mut self) {
        _ = self.shutdown_manager.trigger_shutdown(());
    }
}

async fn handle_udp(socket: Arc<UdpSocket>, mut handle: KcpHandle) -> io::Result<()> {
    let mut buf = vec![0; 65536];
    loop {
        let (len, addr) = match socket.recv_from(&mut buf).await {
            Ok(rs) => rs,
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
            Err(e) => return Err(e),
        };
        handle.handle(&buf[..len], addr);
    }
}
