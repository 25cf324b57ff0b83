use crate::config::AddressStyle;
use crate::error::{TraceError, TraceResult};
use std::net::{SocketAddr, ToSocketAddrs};

/// The capability through which hostnames become socket addresses.
///
/// Resolution itself is outside the engine; the engine picks the first
/// returned address compatible with the configured [`AddressStyle`].
pub trait Resolver {
    /// Resolve a hostname to candidate socket addresses.
    fn resolve(&self, hostname: &str, style: AddressStyle) -> TraceResult<Vec<SocketAddr>>;
}

/// A resolver backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, hostname: &str, _style: AddressStyle) -> TraceResult<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (hostname, 0_u16)
            .to_socket_addrs()
            .map_err(|_| TraceError::InvalidHostname(hostname.to_string()))?
            .collect();
        Ok(addrs)
    }
}

/// Pick the first address compatible with the style.
pub(crate) fn select_addr(
    hostname: &str,
    addrs: Vec<SocketAddr>,
    style: AddressStyle,
) -> TraceResult<SocketAddr> {
    addrs
        .into_iter()
        .find(|addr| style.matches(addr))
        .ok_or_else(|| TraceError::ResolutionFailed(hostname.to_string()))
}
