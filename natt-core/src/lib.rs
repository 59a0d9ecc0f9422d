//! # natt-core - Rendezvous building blocks
//!
//! `natt-core` holds the pieces a NAT-ed tunnel endpoint needs before any
//! payload moves: learning the externally visible address of a local UDP port,
//! publishing that address under a DNS name, and resolving it again on the
//! other side.
//!
//! ## Architecture
//!
//! - [`endpoint`] - the externally reachable `ip:port` pair and its TXT encoding
//! - [`stun`] - STUN binding requests against a public reflector
//! - [`socket`] - low-level UDP socket creation
//! - [`dns`] - A/TXT lookups and rendezvous resolution
//! - [`directory`] - idempotent publication of the rendezvous record
//! - [`error`] - the error taxonomy shared by the modules above
//!
//! ## Discovering and publishing
//!
//! ```rust,no_run
//! use natt_core::directory::{publish, CloudflareDirectory};
//! use natt_core::stun::{EndpointDiscovery, StunConfig, StunDiscoverer};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let discoverer = StunDiscoverer::new(StunConfig::default());
//! let discovery = discoverer.discover(Some(41000)).await?;
//!
//! let directory = CloudflareDirectory::new("api-token")?;
//! publish(&directory, "tunnel.example.com", discovery.external).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Resolving
//!
//! ```rust,no_run
//! use natt_core::dns::{resolve, DnsLookup};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let lookup = DnsLookup::default();
//! let addr = resolve(&lookup, "tunnel.example.com").await?;
//! println!("dial {addr}");
//! # Ok(())
//! # }
//! ```

pub mod directory;
pub mod dns;
pub mod endpoint;
pub mod error;
pub mod socket;
pub mod stun;

pub use endpoint::Endpoint;
