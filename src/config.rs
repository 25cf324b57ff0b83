use crate::error::{TraceError, TraceResult};
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::time::Duration;

/// Default values for session configuration.
pub mod defaults {
    use crate::config::{AddressStyle, PrivilegeMode};
    use std::time::Duration;

    /// The default value for `max-hops`.
    pub const DEFAULT_MAX_HOPS: u8 = 30;

    /// The default value for `hop-timeout`.
    pub const DEFAULT_HOP_TIMEOUT: Duration = Duration::from_secs(5);

    /// The default value for `probes-per-hop`.
    pub const DEFAULT_PROBES_PER_HOP: u8 = 3;

    /// The default value for `probe-gap`.
    pub const DEFAULT_PROBE_GAP: Duration = Duration::from_millis(10);

    /// The default value for `address-style`.
    pub const DEFAULT_ADDRESS_STYLE: AddressStyle = AddressStyle::Any;

    /// The default value for `privilege-mode`.
    pub const DEFAULT_PRIVILEGE_MODE: PrivilegeMode = PrivilegeMode::Privileged;

    /// The default interval between continuous ping probes.
    pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(1);

    /// The capacity of the continuous ping latency history.
    pub const DEFAULT_LATENCY_HISTORY: usize = 100;

    /// The largest permitted `hop-timeout`.
    pub const MAX_HOP_TIMEOUT: Duration = Duration::from_secs(60);

    /// The largest permitted `probes-per-hop`.
    pub const MAX_PROBES_PER_HOP: u8 = 10;
}

/// Which address families are acceptable when resolving the target.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AddressStyle {
    /// Use the first address returned, whatever its family.
    Any,
    /// Use only IPv4 addresses.
    V4Only,
    /// Use only IPv6 addresses.
    V6Only,
}

impl AddressStyle {
    /// Is the given address acceptable under this style?
    #[must_use]
    pub const fn matches(self, addr: &SocketAddr) -> bool {
        match self {
            Self::Any => true,
            Self::V4Only => addr.is_ipv4(),
            Self::V6Only => addr.is_ipv6(),
        }
    }
}

impl Display for AddressStyle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::V4Only => write!(f, "v4-only"),
            Self::V6Only => write!(f, "v6-only"),
        }
    }
}

/// The address family of a resolved target.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AddrFamily {
    /// Internet Protocol V4
    Ipv4,
    /// Internet Protocol V6
    Ipv6,
}

impl AddrFamily {
    /// The family of the given address.
    #[must_use]
    pub const fn of(addr: &SocketAddr) -> Self {
        if addr.is_ipv4() {
            Self::Ipv4
        } else {
            Self::Ipv6
        }
    }
}

impl Display for AddrFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ipv4 => write!(f, "v4"),
            Self::Ipv6 => write!(f, "v6"),
        }
    }
}

/// The socket privilege mode.
///
/// In `Privileged` mode a raw ICMP socket is used, which typically requires
/// `CAP_NET_RAW` or root.  In `Unprivileged` mode an ICMP datagram socket is
/// used where the platform provides one; the kernel may rewrite the Echo
/// `identifier` on such sockets and so identifier filtering is disabled.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PrivilegeMode {
    /// Privileged mode.
    Privileged,
    /// Unprivileged mode.
    Unprivileged,
}

impl PrivilegeMode {
    #[must_use]
    pub const fn is_unprivileged(self) -> bool {
        match self {
            Self::Privileged => false,
            Self::Unprivileged => true,
        }
    }
}

impl Display for PrivilegeMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Privileged => write!(f, "privileged"),
            Self::Unprivileged => write!(f, "unprivileged"),
        }
    }
}

/// Configuration for a traceroute session or continuous ping.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SessionConfig {
    /// The maximum number of hops to probe.
    pub max_hops: u8,
    /// How long to wait for replies to the probes of a single hop.
    pub hop_timeout: Duration,
    /// The number of probes to send for each hop.
    pub probes_per_hop: u8,
    /// The delay between probes for the same hop.
    pub probe_gap: Duration,
    /// Which address families are acceptable for the target.
    pub address_style: AddressStyle,
    /// Whether to open raw or datagram ICMP sockets.
    pub privilege_mode: PrivilegeMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_hops: defaults::DEFAULT_MAX_HOPS,
            hop_timeout: defaults::DEFAULT_HOP_TIMEOUT,
            probes_per_hop: defaults::DEFAULT_PROBES_PER_HOP,
            probe_gap: defaults::DEFAULT_PROBE_GAP,
            address_style: defaults::DEFAULT_ADDRESS_STYLE,
            privilege_mode: defaults::DEFAULT_PRIVILEGE_MODE,
        }
    }
}

impl SessionConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> TraceResult<()> {
        if self.max_hops < 1 {
            return Err(TraceError::InvalidConfiguration(format!(
                "max_hops must be at least 1, got {}",
                self.max_hops
            )));
        }
        if self.hop_timeout.is_zero() || self.hop_timeout > defaults::MAX_HOP_TIMEOUT {
            return Err(TraceError::InvalidConfiguration(format!(
                "hop_timeout must be within (0, {}s], got {:?}",
                defaults::MAX_HOP_TIMEOUT.as_secs(),
                self.hop_timeout
            )));
        }
        if self.probes_per_hop < 1 || self.probes_per_hop > defaults::MAX_PROBES_PER_HOP {
            return Err(TraceError::InvalidConfiguration(format!(
                "probes_per_hop must be within [1, {}], got {}",
                defaults::MAX_PROBES_PER_HOP,
                self.probes_per_hop
            )));
        }
        Ok(())
    }
}
