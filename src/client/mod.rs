//! Tunnel client: resolves the published record on every new connection and
//! relays it over a fresh KCP session.

use std::sync::Arc;

use async_shutdown::ShutdownManager;
use natt_core::dns::{resolve, RecordLookup};
use natt_reliable::KcpStream;
use tokio::net::{TcpListener, TcpStream};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::relay::relay;

mod proxy;

#[derive(Clone)]
pub struct TunnelClient {
    config: Arc<ClientConfig>,
    lookup: Arc<dyn RecordLookup>,
    shutdown_manager: ShutdownManager<()>,
}

impl TunnelClient {
    pub fn new(config: ClientConfig, lookup: Arc<dyn RecordLookup>) -> Self {
        Self {
            config: Arc::new(config),
            lookup,
            shutdown_manager: ShutdownManager::new(),
        }
    }

    /// Resolves the server's current endpoint and opens a session to it.
    pub async fn dial(&self) -> Result<KcpStream> {
        let addr = resolve(self.lookup.as_ref(), &self.config.fqdn).await?;
        log::debug!("{} resolved to {addr}", self.config.fqdn);
        KcpStream::connect(addr, &self.config.kcp)
            .await
            .map_err(|source| Error::Dial {
                target: addr.to_string(),
                source,
            })
    }

    /// Binds the configured local address and serves it until [`close`](Self::close).
    pub async fn listen(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen.socket_addr()).await?;
        self.serve(listener).await
    }

    /// Tunnels every connection accepted on `listener`. A failed resolution
    /// or dial only costs the connection it was made for.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        log::info!(
            "forwarding {} to {}",
            listener.local_addr()?,
            self.config.fqdn
        );
        loop {
            let (stream, peer_addr) = tokio::select! {
                rs = listener.accept() => match rs {
                    Ok(rs) => rs,
                    Err(e) => {
                        log::warn!("accept: {e}");
                        continue;
                    }
                },
                _ = self.shutdown_manager.wait_shutdown_triggered() => {
                    log::debug!("client listener shutdown");
                    return Ok(());
                }
            };
            let client = self.clone();
            tokio::spawn(async move {
                if let Err(e) = client.forward(stream).await {
                    log::warn!("connection from {peer_addr}: {e}");
                }
            });
        }
    }

    async fn forward(&self, local: TcpStream) -> Result<()> {
        _ = local.set_nodelay(true);
        let stream = self.dial().await?;
        log::info!(
            "tunnel {} -> {} open",
            stream.local_addr(),
            stream.remote_addr()
        );
        relay(local, stream).await?;
        Ok(())
    }

    pub fn close(&self) {
        _ = self.shutdown_manager.trigger_shutdown(());
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown_manager.is_shutdown_triggered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BindSpec, ServerConfig};
    use crate::server::tests::{spawn_echo_target, FakeDiscovery, PUBLIC_IP};
    use crate::server::TunnelServer;
    use async_trait::async_trait;
    use natt_core::directory::MemoryDirectory;
    use natt_core::error::ResolutionError;
    use std::io;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Sees the published records but, standing on the server's own host,
    /// reaches the public address through loopback.
    struct Hairpin(Arc<MemoryDirectory>);

    #[async_trait]
    impl RecordLookup for Hairpin {
        async fn lookup_a(&self, domain: &str) -> io::Result<Vec<Ipv4Addr>> {
            let ips = self.0.lookup_a(domain).await?;
            Ok(ips
                .into_iter()
                .map(|ip| if ip == PUBLIC_IP { Ipv4Addr::LOCALHOST } else { ip })
                .collect())
        }
        async fn lookup_txt(&self, domain: &str) -> io::Result<Vec<String>> {
            self.0.lookup_txt(domain).await
        }
    }

    #[tokio::test]
    async fn end_to_end() {
        let target = spawn_echo_target().await;
        let discovery = Arc::new(FakeDiscovery::default());
        let directory = Arc::new(MemoryDirectory::new(["example.com"]));
        let config = ServerConfig::new("tunnel.example.com")
            .set_bind(BindSpec::new(Ipv4Addr::LOCALHOST, 0))
            .set_target(target);
        let server = TunnelServer::new(config, discovery, directory.clone());
        server.start().await.unwrap();
        let port = server.local_port();

        let published = resolve(directory.as_ref(), "tunnel.example.com").await.unwrap();
        assert_eq!(published.to_string(), format!("203.0.113.5:{port}"));

        let client = TunnelClient::new(
            ClientConfig::new("tunnel.example.com"),
            Arc::new(Hairpin(directory.clone())),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();
        let serving = tokio::spawn({
            let client = client.clone();
            async move { client.serve(listener).await }
        });

        let before = server.stats().last_session_end;
        let mut conn = TcpStream::connect(local_addr).await.unwrap();
        let data: Vec<u8> = (0..1024).map(|i| (i % 256) as u8).collect();
        conn.write_all(&data).await.unwrap();
        let mut echoed = vec![0; data.len()];
        tokio::time::timeout(Duration::from_secs(5), conn.read_exact(&mut echoed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(echoed, data);
        assert_eq!(server.stats().active_sessions, 1);
        drop(conn);

        tokio::time::timeout(Duration::from_secs(5), async {
            while server.stats().active_sessions != 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(server.stats().last_session_end > before);

        client.close();
        serving.await.unwrap().unwrap();
        server.close().await;
    }

    #[tokio::test]
    async fn resolution_failure_only_drops_that_connection() {
        let directory = Arc::new(MemoryDirectory::new(["example.com"]));
        let client = TunnelClient::new(ClientConfig::new("missing.example.com"), directory);
        assert!(matches!(
            client.dial().await,
            Err(Error::Resolution(ResolutionError::NoAddress(_)))
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();
        let serving = tokio::spawn({
            let client = client.clone();
            async move { client.serve(listener).await }
        });
        for _ in 0..2 {
            let mut conn = TcpStream::connect(local_addr).await.unwrap();
            let mut rest = Vec::new();
            tokio::time::timeout(Duration::from_secs(5), conn.read_to_end(&mut rest))
                .await
                .unwrap()
                .unwrap();
            assert!(rest.is_empty());
        }
        assert!(!serving.is_finished());
        client.close();
        serving.await.unwrap().unwrap();
    }
}
