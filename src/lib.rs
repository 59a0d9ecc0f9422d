//! # natt - SSH into a NAT-ed host over a published KCP tunnel
//!
//! The server side learns the public `ip:port` of one local UDP port with a
//! STUN binding request, publishes it under a DNS name (an A record plus a
//! `kcp-port=<port>` TXT record), and relays every KCP session arriving on
//! that port to a local TCP service such as `127.0.0.1:22`. The client
//! resolves the name for each new connection and relays a local TCP
//! connection, or its own stdin/stdout, over a fresh KCP session.
//!
//! ## Server
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use natt::config::ServerConfig;
//! use natt::server::TunnelServer;
//! use natt_core::directory::CloudflareDirectory;
//! use natt_core::stun::{StunConfig, StunDiscoverer};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let server = TunnelServer::new(
//!     ServerConfig::new("tunnel.example.com"),
//!     Arc::new(StunDiscoverer::new(StunConfig::default())),
//!     Arc::new(CloudflareDirectory::new("api-token")?),
//! );
//! server.start().await?;
//! natt::signal::shutdown_signal().await?;
//! server.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Client
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use natt::client::TunnelClient;
//! use natt::config::ClientConfig;
//! use natt_core::dns::DnsLookup;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = TunnelClient::new(
//!     ClientConfig::new("tunnel.example.com"),
//!     Arc::new(DnsLookup::default()),
//! );
//! client.listen().await?;
//! # Ok(())
//! # }
//! ```

pub use crate::error::{Error, Result};

pub mod client;
pub mod config;
pub mod ddns;
pub mod error;
pub mod relay;
pub mod server;
pub mod signal;
