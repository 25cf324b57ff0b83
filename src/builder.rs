use crate::config::{AddressStyle, PrivilegeMode, SessionConfig};
#[cfg(unix)]
use crate::error::TraceResult;
#[cfg(unix)]
use crate::net::SocketImpl;
#[cfg(unix)]
use crate::observer::{Observer, PingObserver};
#[cfg(unix)]
use crate::pinger::ContinuousPinger;
#[cfg(unix)]
use crate::session::Session;
use std::time::Duration;

/// Build a traceroute session or continuous pinger.
///
/// A convenience over assembling a [`SessionConfig`] by hand.
///
/// # Examples:
///
/// ```no_run
/// use hoptrace::{AddressStyle, Builder, NullObserver, SystemResolver};
///
/// let mut session = Builder::new("example.com", NullObserver)
///     .max_hops(64)
///     .address_style(AddressStyle::V4Only)
///     .session()
///     .unwrap();
/// let result = session.start(&SystemResolver).unwrap();
/// println!("{} hops", result.actual_hops);
/// ```
pub struct Builder<O> {
    hostname: String,
    observer: O,
    config: SessionConfig,
}

impl<O> Builder<O> {
    /// Build for a given target hostname or address literal.
    pub fn new(hostname: impl Into<String>, observer: O) -> Self {
        Self {
            hostname: hostname.into(),
            observer,
            config: SessionConfig::default(),
        }
    }

    /// Set the maximum number of hops.
    #[must_use]
    pub fn max_hops(self, max_hops: u8) -> Self {
        Self {
            config: SessionConfig {
                max_hops,
                ..self.config
            },
            ..self
        }
    }

    /// Set the per-hop timeout.
    #[must_use]
    pub fn hop_timeout(self, hop_timeout: Duration) -> Self {
        Self {
            config: SessionConfig {
                hop_timeout,
                ..self.config
            },
            ..self
        }
    }

    /// Set the number of probes per hop.
    #[must_use]
    pub fn probes_per_hop(self, probes_per_hop: u8) -> Self {
        Self {
            config: SessionConfig {
                probes_per_hop,
                ..self.config
            },
            ..self
        }
    }

    /// Set the delay between probes for the same hop.
    #[must_use]
    pub fn probe_gap(self, probe_gap: Duration) -> Self {
        Self {
            config: SessionConfig {
                probe_gap,
                ..self.config
            },
            ..self
        }
    }

    /// Set the address style.
    #[must_use]
    pub fn address_style(self, address_style: AddressStyle) -> Self {
        Self {
            config: SessionConfig {
                address_style,
                ..self.config
            },
            ..self
        }
    }

    /// Set the privilege mode.
    #[must_use]
    pub fn privilege_mode(self, privilege_mode: PrivilegeMode) -> Self {
        Self {
            config: SessionConfig {
                privilege_mode,
                ..self.config
            },
            ..self
        }
    }
}

#[cfg(unix)]
impl<O: Observer> Builder<O> {
    /// Validate the configuration and build a [`Session`].
    pub fn session(self) -> TraceResult<Session<SocketImpl, O>> {
        self.config.validate()?;
        Ok(Session::new(self.hostname, self.config, self.observer))
    }
}

#[cfg(unix)]
impl<O: PingObserver> Builder<O> {
    /// Validate the configuration and build a [`ContinuousPinger`].
    pub fn pinger(self) -> TraceResult<ContinuousPinger<SocketImpl, O>> {
        self.config.validate()?;
        Ok(ContinuousPinger::new(
            self.hostname,
            self.config,
            self.observer,
        ))
    }
}
