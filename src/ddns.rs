//! Plain dynamic DNS: publish this host's public IPv4 address, no tunnel.

use std::net::Ipv4Addr;

use natt_core::directory::{publish_address, Directory};
use serde::Deserialize;

use crate::config::DdnsConfig;
use crate::error::{Error, Result};

#[derive(Deserialize)]
struct EchoResponse {
    ip: String,
}

/// Asks an IP echo service which address our requests come from.
pub async fn public_ipv4(config: &DdnsConfig) -> Result<Ipv4Addr> {
    let client = reqwest::Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| Error::Echo(e.to_string()))?;
    let response = client
        .get(&config.echo_url)
        .send()
        .await
        .map_err(|e| Error::Echo(e.to_string()))?;
    if !response.status().is_success() {
        return Err(Error::Echo(format!(
            "{} answered {}",
            config.echo_url,
            response.status()
        )));
    }
    let echo: EchoResponse = response
        .json()
        .await
        .map_err(|e| Error::Echo(e.to_string()))?;
    echo.ip
        .parse()
        .map_err(|_| Error::Echo(format!("{:?} is not an IPv4 address", echo.ip)))
}

/// Looks up the public address and upserts the A record of `config.fqdn`.
pub async fn update<D: Directory + ?Sized>(config: &DdnsConfig, directory: &D) -> Result<Ipv4Addr> {
    let ip = public_ipv4(config).await?;
    log::info!("public address is {ip}");
    publish_address(directory, &config.fqdn, ip).await?;
    Ok(ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use natt_core::directory::{MemoryDirectory, RecordType};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers every request with `status` and `body`.
    async fn spawn_echo(status: u16, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0; 4096];
                let mut head = Vec::new();
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&buf[..n]);
                }
                let response = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                _ = stream.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{addr}/?format=json")
    }

    #[tokio::test]
    async fn publishes_the_echoed_address() {
        let url = spawn_echo(200, r#"{"ip":"198.51.100.7"}"#).await;
        let config = DdnsConfig::new("home.example.com").set_echo_url(url);
        let directory = MemoryDirectory::new(["example.com"]);
        let ip = update(&config, &directory).await.unwrap();
        assert_eq!(ip, Ipv4Addr::new(198, 51, 100, 7));
        let a = directory.records(RecordType::A, "home.example.com");
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].content, "198.51.100.7");
    }

    #[tokio::test]
    async fn echo_failures() {
        let url = spawn_echo(200, r#"{"ip":"2001:db8::1"}"#).await;
        let config = DdnsConfig::new("home.example.com").set_echo_url(url);
        assert!(matches!(public_ipv4(&config).await, Err(Error::Echo(_))));

        let url = spawn_echo(503, r#"{}"#).await;
        let config = DdnsConfig::new("home.example.com").set_echo_url(url);
        assert!(matches!(public_ipv4(&config).await, Err(Error::Echo(_))));
    }
}
