use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::directory::RecordType;

/// Failure to learn the external mapping of a local port.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("reflector {0:?} did not resolve to an IPv4 address")]
    Resolve(String),
    #[error("reflector io: {0}")]
    Io(#[from] io::Error),
    #[error("reflector {server} did not answer within {timeout:?}")]
    Timeout { server: String, timeout: Duration },
    #[error("malformed binding response: {0}")]
    Malformed(String),
    #[error("binding response carries no mapped address")]
    NoMappedAddress,
    #[error("mapped address {0} is not IPv4")]
    NotIpv4(SocketAddr),
}

/// Failure to publish the rendezvous record.
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("zone not found for name: {0}")]
    ZoneNotFound(String),
    #[error("{count} {record_type} records found for name {name}, refusing to pick one")]
    AmbiguousRecord {
        name: String,
        record_type: RecordType,
        count: usize,
    },
    #[error("directory api: {0}")]
    Api(String),
    #[error("directory http: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failure to turn a published name back into a dialable address.
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("lookup failed: {0}")]
    Lookup(#[from] io::Error),
    #[error("no address records for {0}")]
    NoAddress(String),
    #[error("no port found in TXT records for {0}")]
    NoPort(String),
    #[error("invalid port in TXT record: {0}")]
    InvalidPort(String),
}
