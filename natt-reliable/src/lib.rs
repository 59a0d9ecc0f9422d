//! # natt-reliable - Reliable byte streams over UDP
//!
//! `natt-reliable` carries ordered, reliable, congestion-controlled byte
//! streams over plain UDP using the KCP protocol in stream mode. A
//! [`KcpListener`] serves any number of sessions from one UDP port, which is
//! what lets a NAT mapping learned for that port be handed out to clients.
//!
//! There is no handshake of its own: a session begins with its first data
//! segment and ends with a short close datagram once the writer has shut down
//! and its data has been acknowledged.
//!
//! ## Dialing
//!
//! ```rust,no_run
//! use natt_reliable::{KcpConfig, KcpStream};
//! use tokio::io::AsyncWriteExt;
//!
//! # #[tokio::main]
//! # async fn main() -> std::io::Result<()> {
//! let mut stream = KcpStream::connect("203.0.113.5:41000".parse().unwrap(), &KcpConfig::default()).await?;
//! stream.write_all(b"SSH-2.0-client\r\n").await?;
//! stream.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub use crate::config::KcpConfig;
pub use crate::listener::KcpListener;
pub use crate::stream::KcpStream;

mod config;
mod kcp;
mod listener;
mod stream;
