use tokio::io::{AsyncRead, AsyncWrite};

use crate::client::TunnelClient;
use crate::error::Result;
use crate::relay::pipe;

impl TunnelClient {
    /// Single-shot mode: one session relayed to `reader`/`writer`.
    ///
    /// Returns when either direction ends; the first copy error, if any, is
    /// the result.
    pub async fn proxy<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let stream = self.dial().await?;
        log::debug!(
            "proxying stdio over {} -> {}",
            stream.local_addr(),
            stream.remote_addr()
        );
        let (stream_reader, stream_writer) = tokio::io::split(stream);
        pipe(reader, writer, stream_reader, stream_writer).await?;
        Ok(())
    }

    /// [`proxy`](Self::proxy) over the process's standard input and output,
    /// as an SSH `ProxyCommand` expects.
    pub async fn proxy_stdio(&self) -> Result<()> {
        self.proxy(tokio::io::stdin(), tokio::io::stdout()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BindSpec, ClientConfig, ServerConfig};
    use crate::error::Error;
    use crate::server::tests::{spawn_echo_target, FakeDiscovery};
    use crate::server::TunnelServer;
    use natt_core::directory::MemoryDirectory;
    use natt_core::dns::RecordLookup;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn proxy_relays_until_input_ends() {
        let target = spawn_echo_target().await;
        let directory = Arc::new(MemoryDirectory::new(["example.com"]));
        let config = ServerConfig::new("tunnel.example.com")
            .set_bind(BindSpec::new(Ipv4Addr::LOCALHOST, 0))
            .set_target(target);
        let server = TunnelServer::new(
            config,
            Arc::new(FakeDiscovery::default()),
            directory.clone(),
        );
        server.start().await.unwrap();
        // publish a loopback address for this host's own client
        natt_core::directory::publish_address(
            directory.as_ref(),
            "tunnel.example.com",
            Ipv4Addr::LOCALHOST,
        )
        .await
        .unwrap();

        let client = TunnelClient::new(ClientConfig::new("tunnel.example.com"), directory);
        let (input, mut input_peer) = tokio::io::duplex(4096);
        let (output, mut output_peer) = tokio::io::duplex(4096);
        let (input_reader, _input_writer) = tokio::io::split(input);
        let (_output_reader, output_writer) = tokio::io::split(output);
        let proxy = tokio::spawn(async move { client.proxy(input_reader, output_writer).await });

        input_peer.write_all(b"ssh-banner").await.unwrap();
        let mut buf = [0; 10];
        tokio::time::timeout(Duration::from_secs(5), output_peer.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"ssh-banner");

        drop(input_peer);
        tokio::time::timeout(Duration::from_secs(5), proxy)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        server.close().await;
    }

    #[tokio::test]
    async fn proxy_fails_when_unresolvable() {
        let directory: Arc<dyn RecordLookup> = Arc::new(MemoryDirectory::new(["example.com"]));
        let client = TunnelClient::new(ClientConfig::new("missing.example.com"), directory);
        let rs = client.proxy(tokio::io::empty(), tokio::io::sink()).await;
        assert!(matches!(rs, Err(Error::Resolution(_))), "{rs:?}");
    }
}
