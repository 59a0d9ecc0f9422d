use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use std::time::Duration;

use natt_reliable::KcpConfig;

use crate::error::Error;

pub const DEFAULT_TARGET: &str = "127.0.0.1:22";
pub const DEFAULT_CLIENT_LISTEN: &str = ":10022";
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(30);
pub const IDLE_THRESHOLD: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_ECHO_URL: &str = "https://api.ipify.org?format=json";
pub const ECHO_TIMEOUT: Duration = Duration::from_secs(5);

/// A local IPv4 bind address written as `:PORT`, `PORT` or `HOST:PORT`.
///
/// An omitted host means every interface; port 0 asks for a port chosen at
/// start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindSpec {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl BindSpec {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }
    pub fn is_dynamic(&self) -> bool {
        self.port == 0
    }
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddrV4::new(self.ip, self.port).into()
    }
    pub fn with_port(&self, port: u16) -> SocketAddr {
        SocketAddrV4::new(self.ip, port).into()
    }
}

impl Default for BindSpec {
    fn default() -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED, 0)
    }
}

impl FromStr for BindSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => (host, port),
            None => ("", s),
        };
        let ip = if host.is_empty() {
            Ipv4Addr::UNSPECIFIED
        } else {
            host.parse()
                .map_err(|_| Error::Config(format!("bind host {host:?} is not an IPv4 address")))?
        };
        let port = port
            .parse()
            .map_err(|_| Error::Config(format!("bind port {port:?} is not a port number")))?;
        Ok(Self { ip, port })
    }
}

impl fmt::Display for BindSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub fqdn: String,
    pub bind: BindSpec,
    /// Local service every tunnel session is relayed to.
    pub target: String,
    pub connect_timeout: Duration,
    pub monitor_interval: Duration,
    /// How long the server may sit without sessions before the published
    /// mapping is verified again.
    pub idle_threshold: Duration,
    pub kcp: KcpConfig,
}

impl ServerConfig {
    pub fn new(fqdn: impl Into<String>) -> Self {
        Self {
            fqdn: fqdn.into(),
            bind: BindSpec::default(),
            target: DEFAULT_TARGET.to_string(),
            connect_timeout: CONNECT_TIMEOUT,
            monitor_interval: MONITOR_INTERVAL,
            idle_threshold: IDLE_THRESHOLD,
            kcp: KcpConfig::default(),
        }
    }
    pub fn set_bind(mut self, bind: BindSpec) -> Self {
        self.bind = bind;
        self
    }
    pub fn set_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }
    pub fn set_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
    pub fn set_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }
    pub fn set_idle_threshold(mut self, threshold: Duration) -> Self {
        self.idle_threshold = threshold;
        self
    }
    pub fn set_kcp_config(mut self, kcp: KcpConfig) -> Self {
        self.kcp = kcp;
        self
    }
    pub(crate) fn check(&self) -> Result<(), Error> {
        if self.fqdn.is_empty() {
            return Err(Error::Config("target fqdn is required".into()));
        }
        if self.target.is_empty() {
            return Err(Error::Config("local target is required".into()));
        }
        if self.monitor_interval.is_zero() {
            return Err(Error::Config("monitor interval must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub fqdn: String,
    pub listen: BindSpec,
    pub kcp: KcpConfig,
}

impl ClientConfig {
    pub fn new(fqdn: impl Into<String>) -> Self {
        Self {
            fqdn: fqdn.into(),
            listen: BindSpec::new(Ipv4Addr::UNSPECIFIED, 10022),
            kcp: KcpConfig::default(),
        }
    }
    pub fn set_listen(mut self, listen: BindSpec) -> Self {
        self.listen = listen;
        self
    }
    pub fn set_kcp_config(mut self, kcp: KcpConfig) -> Self {
        self.kcp = kcp;
        self
    }
}

#[derive(Clone, Debug)]
pub struct DdnsConfig {
    pub fqdn: String,
    pub echo_url: String,
    pub timeout: Duration,
}

impl DdnsConfig {
    pub fn new(fqdn: impl Into<String>) -> Self {
        Self {
            fqdn: fqdn.into(),
            echo_url: DEFAULT_ECHO_URL.to_string(),
            timeout: ECHO_TIMEOUT,
        }
    }
    pub fn set_echo_url(mut self, url: impl Into<String>) -> Self {
        self.echo_url = url.into();
        self
    }
    pub fn set_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_spec_forms() {
        let spec: BindSpec = ":0".parse().unwrap();
        assert!(spec.is_dynamic());
        assert_eq!(spec.ip, Ipv4Addr::UNSPECIFIED);

        let spec: BindSpec = ":41000".parse().unwrap();
        assert_eq!(spec, BindSpec::new(Ipv4Addr::UNSPECIFIED, 41000));

        let spec: BindSpec = "41000".parse().unwrap();
        assert_eq!(spec.port, 41000);

        let spec: BindSpec = "127.0.0.1:2222".parse().unwrap();
        assert_eq!(spec.socket_addr().to_string(), "127.0.0.1:2222");
        assert_eq!(spec.with_port(7).to_string(), "127.0.0.1:7");
    }

    #[test]
    fn bad_bind_specs() {
        for bad in ["", ":", "host:22", ":70000", "::1:22", "1.2.3.4:x"] {
            assert!(bad.parse::<BindSpec>().is_err(), "{bad}");
        }
    }

    #[test]
    fn server_config_needs_a_name() {
        assert!(ServerConfig::new("").check().is_err());
        let config = ServerConfig::new("tunnel.example.com");
        config.check().unwrap();
        assert_eq!(config.target, "127.0.0.1:22");
        assert_eq!(config.idle_threshold, Duration::from_secs(300));
        assert_eq!(config.monitor_interval, Duration::from_secs(30));
        assert_eq!(ClientConfig::new("x").listen.to_string(), "0.0.0.0:10022");
    }
}
