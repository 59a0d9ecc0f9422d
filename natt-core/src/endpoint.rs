use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Prefix of the TXT record that carries the published port.
///
/// Publisher and resolver must agree on it bit for bit.
pub const PORT_RECORD_PREFIX: &str = "kcp-port=";

/// An externally reachable address, as seen from outside the NAT.
///
/// Superseded, never mutated, when the mapping changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddrV4::new(self.ip, self.port).into()
    }
    /// TXT content announcing this endpoint's port.
    pub fn port_record(&self) -> String {
        port_record(self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl From<SocketAddrV4> for Endpoint {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(*addr.ip(), addr.port())
    }
}

pub fn port_record(port: u16) -> String {
    format!("{PORT_RECORD_PREFIX}{port}")
}

/// Returns the value after the port prefix, or `None` when the TXT entry is
/// not a port record.
pub fn port_record_value(txt: &str) -> Option<&str> {
    txt.strip_prefix(PORT_RECORD_PREFIX)
}
