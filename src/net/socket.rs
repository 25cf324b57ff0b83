use crate::config::PrivilegeMode;
use std::fmt::Debug;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// The capability through which probes reach the network.
///
/// Readiness waiting is part of this seam: `is_readable` bounded by the
/// next timer deadline is how the engine waits for "socket readable or
/// timer", and substituting an in-memory implementation is how the engine
/// is exercised without privileges.
pub trait Socket: Debug + Sized {
    /// Create an ICMPv4 socket.
    fn new_icmp_ipv4(privilege_mode: PrivilegeMode) -> io::Result<Self>;

    /// Create an ICMPv6 socket.
    fn new_icmp_ipv6(privilege_mode: PrivilegeMode) -> io::Result<Self>;

    /// Set the IPv4 time-to-live.
    fn set_ttl(&self, ttl: u8) -> io::Result<()>;

    /// Read back the IPv4 time-to-live.
    ///
    /// The kernel reports this as an `int`; implementations must
    /// range-check before narrowing.
    fn ttl(&self) -> io::Result<u8>;

    /// Set the IPv6 unicast hop limit.
    fn set_unicast_hops_v6(&self, hops: u8) -> io::Result<()>;

    /// Send a datagram, returning the number of bytes sent.
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;

    /// Returns true if the socket becomes readable before the timeout,
    /// false otherwise.
    fn is_readable(&self, timeout: Duration) -> io::Result<bool>;

    /// Receive a datagram and the address it came from.
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Option<SocketAddr>)>;
}
