use crate::config::PrivilegeMode;
use crate::net::socket::Socket;
use nix::sys::select::FdSet;
use nix::sys::time::{TimeVal, TimeValLike};
use socket2::{Domain, Protocol, SockAddr, Type};
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

/// A network socket backed by `socket2`.
///
/// In privileged mode the socket is raw and inbound IPv4 datagrams include
/// the IP header; in unprivileged mode an ICMP datagram socket is used and
/// inbound datagrams are bare ICMP.
#[derive(Debug)]
pub struct NativeSocket {
    inner: socket2::Socket,
}

impl NativeSocket {
    fn new(domain: Domain, ty: Type, protocol: Protocol) -> io::Result<Self> {
        let inner = socket2::Socket::new(domain, ty, Some(protocol))?;
        inner.set_nonblocking(true)?;
        Ok(Self { inner })
    }

    fn socket_type(privilege_mode: PrivilegeMode) -> Type {
        match privilege_mode {
            PrivilegeMode::Privileged => Type::RAW,
            PrivilegeMode::Unprivileged => Type::DGRAM,
        }
    }
}

impl Socket for NativeSocket {
    fn new_icmp_ipv4(privilege_mode: PrivilegeMode) -> io::Result<Self> {
        Self::new(
            Domain::IPV4,
            Self::socket_type(privilege_mode),
            Protocol::ICMPV4,
        )
    }

    fn new_icmp_ipv6(privilege_mode: PrivilegeMode) -> io::Result<Self> {
        Self::new(
            Domain::IPV6,
            Self::socket_type(privilege_mode),
            Protocol::ICMPV6,
        )
    }

    fn set_ttl(&self, ttl: u8) -> io::Result<()> {
        self.inner.set_ttl(u32::from(ttl))
    }

    fn ttl(&self) -> io::Result<u8> {
        let wide = self.inner.ttl()?;
        u8::try_from(wide).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("ttl out of range: {wide}"),
            )
        })
    }

    fn set_unicast_hops_v6(&self, hops: u8) -> io::Result<()> {
        self.inner.set_unicast_hops_v6(u32::from(hops))
    }

    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.inner.send_to(buf, &SockAddr::from(addr))
    }

    fn is_readable(&self, timeout: Duration) -> io::Result<bool> {
        let mut read = FdSet::new();
        read.insert(self.inner.as_raw_fd());
        let readable = nix::sys::select::select(
            None,
            Some(&mut read),
            None,
            None,
            Some(&mut TimeVal::milliseconds(timeout.as_millis() as i64)),
        )
        .map_err(io::Error::from)?;
        Ok(readable == 1)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Option<SocketAddr>)> {
        self.inner.recv_from_into_buf(buf)
    }
}

/// An extension trait to allow `recv_from` method which writes to a `&mut [u8]`.
///
/// This is required for `socket2::Socket` which [does not currently provide] this method.
///
/// [does not currently provide]: https://github.com/rust-lang/socket2/issues/223
trait RecvFrom {
    fn recv_from_into_buf(&self, buf: &mut [u8]) -> io::Result<(usize, Option<SocketAddr>)>;
}

impl RecvFrom for socket2::Socket {
    // Safety: the `recv` implementation promises not to write uninitialised
    // bytes to the `buf`fer, so this casting is safe.
    #![allow(unsafe_code)]
    fn recv_from_into_buf(&self, buf: &mut [u8]) -> io::Result<(usize, Option<SocketAddr>)> {
        let buf = unsafe { &mut *(buf as *mut [u8] as *mut [std::mem::MaybeUninit<u8>]) };
        self.recv_from(buf)
            .map(|(size, addr)| (size, addr.as_socket()))
    }
}
