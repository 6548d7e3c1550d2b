use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Builds and joins a UDP socket to a multicast group on the given
/// interface.
///
/// `mio::net::UdpSocket` has no multicast-membership API, so the socket is
/// built with `socket2` (bound, joined, and made non-blocking) and then
/// converted into a `std::net::UdpSocket` for `mio::net::UdpSocket::from_std`
/// (the pack's `other_examples` transport file uses the same
/// socket2-build-then-handoff shape for low-level socket configuration).
pub fn join_multicast_v4(group: Ipv4Addr, port: u16, interface: Ipv4Addr) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&bind_addr.into())?;
    socket.join_multicast_v4(&group, &interface)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

pub fn leave_multicast_v4(socket: &std::net::UdpSocket, group: Ipv4Addr, interface: Ipv4Addr) -> io::Result<()> {
    let socket = socket2::SockRef::from(socket);
    socket.leave_multicast_v4(&group, &interface)
}
