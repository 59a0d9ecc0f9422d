use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use dns_parser::{Builder, Packet, QueryClass, QueryType, RData, ResponseCode};
use tokio::net::UdpSocket;

use crate::endpoint::port_record_value;
use crate::error::ResolutionError;

pub const DEFAULT_NAME_SERVERS: [&str; 2] = ["1.1.1.1:53", "8.8.8.8:53"];

/// Read side of the rendezvous directory.
#[async_trait]
pub trait RecordLookup: Send + Sync {
    async fn lookup_a(&self, domain: &str) -> io::Result<Vec<Ipv4Addr>>;
    async fn lookup_txt(&self, domain: &str) -> io::Result<Vec<String>>;
}

/// Resolves the rendezvous record of `fqdn` into a dialable address.
///
/// Nothing is cached, every call asks the directory again.
pub async fn resolve<L: RecordLookup + ?Sized>(
    lookup: &L,
    fqdn: &str,
) -> Result<SocketAddr, ResolutionError> {
    let ips = lookup.lookup_a(fqdn).await?;
    let ip = *ips
        .first()
        .ok_or_else(|| ResolutionError::NoAddress(fqdn.to_string()))?;
    let txt = lookup.lookup_txt(fqdn).await?;
    let value = txt
        .iter()
        .find_map(|record| port_record_value(record))
        .ok_or_else(|| ResolutionError::NoPort(fqdn.to_string()))?;
    let port = parse_port(value).ok_or_else(|| ResolutionError::InvalidPort(value.to_string()))?;
    Ok(SocketAddr::new(ip.into(), port))
}

fn parse_port(value: &str) -> Option<u16> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// Plain UDP DNS client asking the configured name servers in order.
#[derive(Clone, Debug)]
pub struct DnsLookup {
    name_servers: Vec<String>,
    timeout: Duration,
    attempts: usize,
}

impl Default for DnsLookup {
    fn default() -> Self {
        Self::new(DEFAULT_NAME_SERVERS.iter().map(|s| s.to_string()).collect())
    }
}

impl DnsLookup {
    pub fn new(name_servers: Vec<String>) -> Self {
        Self {
            name_servers,
            timeout: Duration::from_secs(3),
            attempts: 3,
        }
    }
    pub fn set_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
    pub fn set_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }
    pub fn name_servers(&self) -> &[String] {
        &self.name_servers
    }

    async fn a_dns(&self, domain: &str, name_server: &str) -> io::Result<Vec<Ipv4Addr>> {
        let name_server = parse_name_server(name_server)?;
        let udp = bind_udp(name_server)?;
        let mut buf = [0; 4096];
        let Some(message) = self
            .query(&udp, domain, name_server, QueryType::A, &mut buf)
            .await?
        else {
            return Ok(vec![]);
        };
        let mut rs = Vec::new();
        for record in message.answers {
            if let RData::A(a) = record.data {
                rs.push(a.0);
            }
        }
        Ok(rs)
    }

    async fn txt_dns(&self, domain: &str, name_server: &str) -> io::Result<Vec<String>> {
        let name_server = parse_name_server(name_server)?;
        let udp = bind_udp(name_server)?;
        let mut buf = [0; 4096];
        let Some(message) = self
            .query(&udp, domain, name_server, QueryType::TXT, &mut buf)
            .await?
        else {
            return Ok(vec![]);
        };
        let mut rs = Vec::new();
        for record in message.answers {
            if let RData::TXT(txt) = record.data {
                let mut value = String::new();
                for x in txt.iter() {
                    let chunk = std::str::from_utf8(x)
                        .map_err(|_| io::Error::other("record type txt is not string"))?;
                    value.push_str(chunk);
                }
                rs.push(value);
            }
        }
        Ok(rs)
    }

    /// Returns `None` when the name does not exist.
    async fn query<'a>(
        &self,
        udp: &UdpSocket,
        domain: &str,
        name_server: SocketAddr,
        record_type: QueryType,
        buf: &'a mut [u8],
    ) -> io::Result<Option<Packet<'a>>> {
        let id: u16 = rand::random();
        let mut builder = Builder::new_query(id, true);
        builder.add_question(domain, false, record_type, QueryClass::IN);
        let packet = builder
            .build()
            .map_err(|_| io::Error::other(format!("domain {domain:?} is too long")))?;

        udp.connect(name_server).await?;
        let mut count = 0;
        let len = loop {
            udp.send(&packet).await?;
            match tokio::time::timeout(self.timeout, udp.recv(buf)).await {
                Ok(len) => break len?,
                Err(_) => {
                    count += 1;
                    if count < self.attempts {
                        continue;
                    }
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("DNS {name_server:?} recv timeout"),
                    ));
                }
            }
        };

        let pkt = Packet::parse(&buf[..len]).map_err(|e| {
            io::Error::other(format!(
                "domain {domain:?} DNS {name_server:?} data error: {e}"
            ))
        })?;
        if pkt.header.id != id {
            return Err(io::Error::other(format!(
                "DNS {name_server:?} answered query {} instead of {id}",
                pkt.header.id
            )));
        }
        match pkt.header.response_code {
            ResponseCode::NoError => Ok(Some(pkt)),
            ResponseCode::NameError => Ok(None),
            code => Err(io::Error::other(format!(
                "response_code {code} DNS {name_server:?} domain {domain:?}"
            ))),
        }
    }
}

#[async_trait]
impl RecordLookup for DnsLookup {
    async fn lookup_a(&self, domain: &str) -> io::Result<Vec<Ipv4Addr>> {
        let mut err: Option<io::Error> = None;
        for name_server in &self.name_servers {
            match self.a_dns(domain, name_server).await {
                Ok(rs) => return Ok(rs),
                Err(e) => {
                    log::debug!("A {domain} via {name_server}: {e}");
                    err.replace(e);
                }
            }
        }
        Err(err.unwrap_or_else(|| io::Error::other(format!("DNS query failed {domain:?}"))))
    }

    async fn lookup_txt(&self, domain: &str) -> io::Result<Vec<String>> {
        let mut err: Option<io::Error> = None;
        for name_server in &self.name_servers {
            match self.txt_dns(domain, name_server).await {
                Ok(rs) => return Ok(rs),
                Err(e) => {
                    log::debug!("TXT {domain} via {name_server}: {e}");
                    err.replace(e);
                }
            }
        }
        Err(err.unwrap_or_else(|| io::Error::other(format!("DNS query failed {domain:?}"))))
    }
}

fn parse_name_server(name_server: &str) -> io::Result<SocketAddr> {
    if let Ok(addr) = name_server.parse::<SocketAddr>() {
        return Ok(addr);
    }
    name_server
        .parse::<std::net::IpAddr>()
        .map(|ip| SocketAddr::new(ip, 53))
        .map_err(|e| io::Error::other(format!("dns {name_server} is error :{e:?}")))
}

fn bind_udp(name_server: SocketAddr) -> io::Result<UdpSocket> {
    let addr: SocketAddr = if name_server.is_ipv4() {
        SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0))
    };
    crate::socket::bind_udp(addr)
}
