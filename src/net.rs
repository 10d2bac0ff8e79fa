//! Passive socket setup: non-blocking IPv4/IPv6 listeners and the control
//! UDP socket, with `SO_REUSEADDR` and `SO_LINGER(1, 0)` per `spec.md`
//! §2.7.
//!
//! Sockets are built with `socket2` (mirroring the setup-then-handoff
//! pattern other servers in this corpus use — e.g.
//! `other_examples/b902ed66_mpimg-srmilter__src-main.rs.rs`) and converted
//! to `mio` types for registration with the `Reactor`.

use anyhow::{Context, Result};
use mio::net::{TcpListener as MioTcpListener, UdpSocket as MioUdpSocket};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::time::Duration;

/// Binds a non-blocking TCP listener on `addr` with `SO_REUSEADDR` and
/// `SO_LINGER(1, 0)` set, ready to register with the `Reactor`.
pub fn bind_tcp_listener(addr: SocketAddr) -> Result<MioTcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .with_context(|| format!("creating TCP socket for {}", addr))?;

    socket
        .set_reuse_address(true)
        .with_context(|| "setting SO_REUSEADDR")?;
    socket
        .set_linger(Some(Duration::from_secs(1)))
        .with_context(|| "setting SO_LINGER")?;
    socket.set_nonblocking(true).with_context(|| "setting O_NONBLOCK")?;

    socket
        .bind(&addr.into())
        .with_context(|| format!("binding TCP listener to {}", addr))?;
    // Backlog: generous fixed value, not exposed as a tunable by spec.md.
    socket.listen(1024).with_context(|| "listen() on TCP socket")?;

    let std_listener: std::net::TcpListener = socket.into();
    MioTcpListener::from_std(std_listener)
        .with_context(|| "wrapping TCP listener for the reactor")
}

/// Binds the non-blocking UDP control-plane socket.
pub fn bind_udp_socket(addr: SocketAddr) -> Result<MioUdpSocket> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .with_context(|| format!("creating UDP socket for {}", addr))?;

    socket
        .set_reuse_address(true)
        .with_context(|| "setting SO_REUSEADDR")?;
    socket.set_nonblocking(true).with_context(|| "setting O_NONBLOCK")?;

    socket
        .bind(&addr.into())
        .with_context(|| format!("binding UDP socket to {}", addr))?;

    let std_socket: std::net::UdpSocket = socket.into();
    MioUdpSocket::from_std(std_socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_ephemeral_tcp_port() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = bind_tcp_listener(addr).unwrap();
        assert!(listener.local_addr().unwrap().port() > 0);
    }

    #[test]
    fn binds_ephemeral_udp_port() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let socket = bind_udp_socket(addr).unwrap();
        assert!(socket.local_addr().unwrap().port() > 0);
    }
}
