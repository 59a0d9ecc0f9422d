use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::Protocol;

const UDP_BUFFER_SIZE: usize = 4 * 1024 * 1024;

pub(crate) fn bind_udp_ops(addr: SocketAddr) -> io::Result<socket2::Socket> {
    let socket = if addr.is_ipv4() {
        socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(Protocol::UDP),
        )?
    } else {
        let socket = socket2::Socket::new(
            socket2::Domain::IPV6,
            socket2::Type::DGRAM,
            Some(Protocol::UDP),
        )?;
        socket.set_only_v6(true)?;
        socket
    };
    if let Err(e) = socket.set_recv_buffer_size(UDP_BUFFER_SIZE) {
        log::debug!("set_recv_buffer_size {e:?}")
    }
    if let Err(e) = socket.set_send_buffer_size(UDP_BUFFER_SIZE) {
        log::debug!("set_send_buffer_size {e:?}")
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket)
}

/// Binds a non-blocking UDP socket and hands it to tokio.
///
/// No address reuse is requested: the probe for a port and the listener on
/// that port must never coexist.
pub fn bind_udp(addr: SocketAddr) -> io::Result<tokio::net::UdpSocket> {
    let socket = bind_udp_ops(addr)
        .map_err(|e| io::Error::new(e.kind(), format!("bind_udp {addr}: {e}")))?;
    tokio::net::UdpSocket::from_std(socket.into())
}

/// Binds `0.0.0.0:port`; port 0 picks an ephemeral one.
pub fn bind_udp_v4(port: u16) -> io::Result<tokio::net::UdpSocket> {
    bind_udp(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())
}
