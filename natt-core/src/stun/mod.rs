//! External endpoint discovery through a STUN reflector.
//!
//! A single binding request is sent from the local port whose mapping we care
//! about, and the XOR-MAPPED-ADDRESS of the answer is the address a peer on
//! the internet has to dial. The mapping is only meaningful for the exact
//! local port that sent the probe, which is why [`EndpointDiscovery::discover`]
//! can pin it.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use stun_format::{Attr, Msg, MsgBuilder, MsgType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::endpoint::Endpoint;
use crate::error::DiscoveryError;
use crate::socket::bind_udp_v4;

pub const DEFAULT_STUN_SERVER: &str = "stunserver2025.stunprotocol.org:3478";
pub const DEFAULT_STUN_PORT: u16 = 3478;
pub const STUN_TIMEOUT: Duration = Duration::from_secs(5);

const HEADER_LEN: usize = 20;
const BINDING_RESPONSE: [u8; 2] = [0x01, 0x01];

/// Transport used for the unpinned probe.
///
/// A pinned probe always uses UDP, since the mapping must belong to the UDP
/// port the tunnel listener binds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProbeTransport {
    #[default]
    Udp,
    Tcp,
}

#[derive(Clone, Debug)]
pub struct StunConfig {
    pub server: String,
    pub timeout: Duration,
    pub transport: ProbeTransport,
}

impl Default for StunConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_STUN_SERVER.to_string(),
            timeout: STUN_TIMEOUT,
            transport: ProbeTransport::Udp,
        }
    }
}

impl StunConfig {
    pub fn set_server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }
    pub fn set_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
    pub fn set_transport(mut self, transport: ProbeTransport) -> Self {
        self.transport = transport;
        self
    }
}

/// Result of one discovery: the external endpoint and the local port it maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discovery {
    pub external: Endpoint,
    pub local_port: u16,
}

#[async_trait]
pub trait EndpointDiscovery: Send + Sync {
    /// Learns the external endpoint for `local_port`, or for a port of the
    /// prober's choosing when `None`.
    async fn discover(&self, local_port: Option<u16>) -> Result<Discovery, DiscoveryError>;
}

pub struct StunDiscoverer {
    config: StunConfig,
}

impl StunDiscoverer {
    pub fn new(config: StunConfig) -> Self {
        Self { config }
    }

    async fn discover_udp(&self, local_port: u16) -> Result<Discovery, DiscoveryError> {
        let server = resolve_server(&self.config.server).await?;
        let socket = bind_udp_v4(local_port)?;
        let local_port = socket.local_addr()?.port();
        socket.connect(server).await?;

        let request = binding_request()?;
        socket.send(&request).await?;
        let mut buf = [0; 1500];
        let len = tokio::time::timeout(self.config.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| self.timeout_error())??;
        let external = mapped_endpoint(&request, &buf[..len])?;
        Ok(Discovery {
            external,
            local_port,
        })
    }

    /// TCP variant for the unpinned start: the local TCP port is meaningless
    /// for UDP, so the external port itself becomes the port to bind.
    async fn discover_tcp(&self) -> Result<Discovery, DiscoveryError> {
        let server = resolve_server(&self.config.server).await?;
        let request = binding_request()?;
        let response = tokio::time::timeout(self.config.timeout, tcp_exchange(server, &request))
            .await
            .map_err(|_| self.timeout_error())??;
        let external = mapped_endpoint(&request, &response)?;
        Ok(Discovery {
            external,
            local_port: external.port,
        })
    }

    fn timeout_error(&self) -> DiscoveryError {
        DiscoveryError::Timeout {
            server: self.config.server.clone(),
            timeout: self.config.timeout,
        }
    }
}

#[async_trait]
impl EndpointDiscovery for StunDiscoverer {
    async fn discover(&self, local_port: Option<u16>) -> Result<Discovery, DiscoveryError> {
        let discovery = match (local_port, self.config.transport) {
            (Some(port), _) => self.discover_udp(port).await?,
            (None, ProbeTransport::Udp) => self.discover_udp(0).await?,
            (None, ProbeTransport::Tcp) => self.discover_tcp().await?,
        };
        log::debug!(
            "stun {} mapped local port {} to {}",
            self.config.server,
            discovery.local_port,
            discovery.external
        );
        Ok(discovery)
    }
}

async fn tcp_exchange(server: SocketAddr, request: &[u8]) -> Result<Vec<u8>, DiscoveryError> {
    let mut stream = TcpStream::connect(server).await?;
    stream.write_all(request).await?;
    let mut response = vec![0; HEADER_LEN];
    stream.read_exact(&mut response).await?;
    let body_len = u16::from_be_bytes([response[2], response[3]]) as usize;
    response.resize(HEADER_LEN + body_len, 0);
    stream.read_exact(&mut response[HEADER_LEN..]).await?;
    Ok(response)
}

async fn resolve_server(server: &str) -> Result<SocketAddr, DiscoveryError> {
    let host = if server.contains(':') {
        server.to_string()
    } else {
        format!("{server}:{DEFAULT_STUN_PORT}")
    };
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(host.clone()).await?.collect();
    addrs
        .into_iter()
        .find(|addr| addr.is_ipv4())
        .ok_or_else(|| DiscoveryError::Resolve(server.to_string()))
}

fn transaction_id() -> u128 {
    rand::random::<u128>() & ((1u128 << 96) - 1)
}

/// Builds a binding request with a fresh transaction id.
pub fn binding_request() -> Result<Vec<u8>, DiscoveryError> {
    let mut buf = [0u8; HEADER_LEN];
    {
        let mut msg = MsgBuilder::from(buf.as_mut_slice());
        msg.typ(MsgType::BindingRequest)
            .ok_or_else(|| DiscoveryError::Malformed("build request: message type".to_string()))?;
        msg.tid(transaction_id())
            .ok_or_else(|| DiscoveryError::Malformed("build request: transaction id".to_string()))?;
    }
    Ok(buf.to_vec())
}

/// Extracts the mapped address from the answer to `request`.
///
/// XOR-MAPPED-ADDRESS wins over the legacy MAPPED-ADDRESS when both are
/// present.
pub fn parse_binding_response(
    request: &[u8],
    response: &[u8],
) -> Result<SocketAddr, DiscoveryError> {
    if response.len() < HEADER_LEN || request.len() < HEADER_LEN {
        return Err(DiscoveryError::Malformed(format!(
            "{} bytes is shorter than a header",
            response.len()
        )));
    }
    if response[..2] != BINDING_RESPONSE {
        return Err(DiscoveryError::Malformed(format!(
            "unexpected message type {:02x}{:02x}",
            response[0], response[1]
        )));
    }
    if response[8..HEADER_LEN] != request[8..HEADER_LEN] {
        return Err(DiscoveryError::Malformed(
            "transaction id mismatch".to_string(),
        ));
    }
    let msg = Msg::from(response);
    let mut mapped: Option<SocketAddr> = None;
    for attr in msg.attrs_iter() {
        match attr {
            Attr::XorMappedAddress(addr) => return Ok(std_addr(addr)),
            Attr::MappedAddress(addr) => {
                if mapped.is_none() {
                    mapped = Some(std_addr(addr));
                }
            }
            _ => {}
        }
    }
    mapped.ok_or(DiscoveryError::NoMappedAddress)
}

fn std_addr(addr: stun_format::SocketAddr) -> SocketAddr {
    match addr {
        stun_format::SocketAddr::V4(ip, port) => SocketAddr::from((ip, port)),
        stun_format::SocketAddr::V6(ip, port) => SocketAddr::from((ip, port)),
    }
}

fn mapped_endpoint(request: &[u8], response: &[u8]) -> Result<Endpoint, DiscoveryError> {
    match parse_binding_response(request, response)? {
        SocketAddr::V4(addr) => Ok(addr.into()),
        addr => Err(DiscoveryError::NotIpv4(addr)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use tokio::net::{TcpListener, UdpSocket};

    const MAGIC_COOKIE: u32 = 0x2112_A442;

    /// Encodes a binding success response echoing the request's transaction id.
    pub(crate) fn binding_response(request: &[u8], mapped: Option<SocketAddrV4>) -> Vec<u8> {
        let mut attrs = Vec::new();
        if let Some(mapped) = mapped {
            let port = mapped.port() ^ (MAGIC_COOKIE >> 16) as u16;
            let ip = u32::from(*mapped.ip()) ^ MAGIC_COOKIE;
            attrs.extend_from_slice(&0x0020u16.to_be_bytes());
            attrs.extend_from_slice(&8u16.to_be_bytes());
            attrs.extend_from_slice(&[0x00, 0x01]);
            attrs.extend_from_slice(&port.to_be_bytes());
            attrs.extend_from_slice(&ip.to_be_bytes());
        }
        let mut response = Vec::with_capacity(HEADER_LEN + attrs.len());
        response.extend_from_slice(&BINDING_RESPONSE);
        response.extend_from_slice(&(attrs.len() as u16).to_be_bytes());
        response.extend_from_slice(&request[4..HEADER_LEN]);
        response.extend_from_slice(&attrs);
        response
    }

    /// Answers every binding request as a NAT at `public_ip` that preserves
    /// the source port.
    pub(crate) async fn spawn_reflector(public_ip: Ipv4Addr) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0; 1500];
            while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                let mapped = SocketAddrV4::new(public_ip, from.port());
                let response = binding_response(&buf[..len], Some(mapped));
                _ = socket.send_to(&response, from).await;
            }
        });
        addr
    }

    fn free_udp_port() -> u16 {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
        socket.local_addr().unwrap().port()
    }

    #[test]
    fn request_is_a_bare_binding_request() {
        let request = binding_request().unwrap();
        assert_eq!(request.len(), HEADER_LEN);
        assert_eq!(&request[..4], &[0x00, 0x01, 0x00, 0x00]);
        let other = binding_request().unwrap();
        assert_ne!(request[8..], other[8..]);
    }

    #[test]
    fn parses_xor_mapped_address() {
        let request = binding_request().unwrap();
        let mapped = SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 5), 41000);
        let response = binding_response(&request, Some(mapped));
        let addr = parse_binding_response(&request, &response).unwrap();
        assert_eq!(addr, SocketAddr::V4(mapped));
    }

    fn with_legacy_mapped(mut response: Vec<u8>, mapped: SocketAddrV4) -> Vec<u8> {
        let mut attr = Vec::new();
        attr.extend_from_slice(&0x0001u16.to_be_bytes());
        attr.extend_from_slice(&8u16.to_be_bytes());
        attr.extend_from_slice(&[0x00, 0x01]);
        attr.extend_from_slice(&mapped.port().to_be_bytes());
        attr.extend_from_slice(&mapped.ip().octets());
        let body_len = u16::from_be_bytes([response[2], response[3]]) + attr.len() as u16;
        response[2..4].copy_from_slice(&body_len.to_be_bytes());
        let mut out = response[..HEADER_LEN].to_vec();
        out.extend_from_slice(&attr);
        out.extend_from_slice(&response[HEADER_LEN..]);
        out
    }

    #[test]
    fn legacy_mapped_address_decodes_to_std_addr() {
        let request = binding_request().unwrap();
        let legacy = SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, 9), 3000);
        let response = with_legacy_mapped(binding_response(&request, None), legacy);
        let addr = parse_binding_response(&request, &response).unwrap();
        assert_eq!(addr, SocketAddr::V4(legacy));
        assert_eq!(
            mapped_endpoint(&request, &response).unwrap(),
            Endpoint::new(Ipv4Addr::new(198, 51, 100, 9), 3000)
        );
    }

    #[test]
    fn xor_mapped_address_wins_over_legacy() {
        let request = binding_request().unwrap();
        let legacy = SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, 9), 3000);
        let xor = SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 5), 41000);
        let response = with_legacy_mapped(binding_response(&request, Some(xor)), legacy);
        let addr = parse_binding_response(&request, &response).unwrap();
        assert_eq!(addr, SocketAddr::V4(xor));
    }

    #[tokio::test]
    async fn reflector_given_by_hostname_resolves_to_ipv4() {
        let reflector = spawn_reflector(Ipv4Addr::new(203, 0, 113, 5)).await;
        let server = resolve_server(&format!("localhost:{}", reflector.port()))
            .await
            .unwrap();
        assert!(server.is_ipv4());
        assert_eq!(server.port(), reflector.port());
    }

    #[test]
    fn rejects_foreign_transaction() {
        let request = binding_request().unwrap();
        let other = binding_request().unwrap();
        let mapped = SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 5), 41000);
        let response = binding_response(&other, Some(mapped));
        assert!(matches!(
            parse_binding_response(&request, &response),
            Err(DiscoveryError::Malformed(_))
        ));
    }

    #[test]
    fn missing_mapped_address_is_an_error() {
        let request = binding_request().unwrap();
        let response = binding_response(&request, None);
        assert!(matches!(
            parse_binding_response(&request, &response),
            Err(DiscoveryError::NoMappedAddress)
        ));
    }

    #[tokio::test]
    async fn pinned_probe_originates_from_the_pinned_port() {
        let reflector = spawn_reflector(Ipv4Addr::new(203, 0, 113, 5)).await;
        let discoverer = StunDiscoverer::new(StunConfig::default().set_server(reflector.to_string()));
        let port = free_udp_port();
        let discovery = discoverer.discover(Some(port)).await.unwrap();
        assert_eq!(discovery.local_port, port);
        assert_eq!(
            discovery.external,
            Endpoint::new(Ipv4Addr::new(203, 0, 113, 5), port)
        );
        // the probe socket is gone once discovery returns
        let socket = bind_udp_v4(port).unwrap();
        assert_eq!(socket.local_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn unpinned_probe_reports_its_port() {
        let reflector = spawn_reflector(Ipv4Addr::new(198, 51, 100, 7)).await;
        let discoverer = StunDiscoverer::new(StunConfig::default().set_server(reflector.to_string()));
        let discovery = discoverer.discover(None).await.unwrap();
        assert_ne!(discovery.local_port, 0);
        assert_eq!(discovery.external.port, discovery.local_port);
    }

    #[tokio::test]
    async fn silent_reflector_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = StunConfig::default()
            .set_server(silent.local_addr().unwrap().to_string())
            .set_timeout(Duration::from_millis(200));
        let discoverer = StunDiscoverer::new(config);
        let rs = discoverer.discover(None).await;
        assert!(matches!(rs, Err(DiscoveryError::Timeout { .. })), "{rs:?}");
    }

    #[tokio::test]
    async fn tcp_probe_binds_the_external_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0; HEADER_LEN];
            stream.read_exact(&mut request).await.unwrap();
            let mapped = SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 10), 45678);
            let response = binding_response(&request, Some(mapped));
            stream.write_all(&response).await.unwrap();
        });
        let config = StunConfig::default()
            .set_server(server.to_string())
            .set_transport(ProbeTransport::Tcp);
        let discovery = StunDiscoverer::new(config).discover(None).await.unwrap();
        assert_eq!(
            discovery.external,
            Endpoint::new(Ipv4Addr::new(192, 0, 2, 10), 45678)
        );
        assert_eq!(discovery.local_port, 45678);
    }
}
