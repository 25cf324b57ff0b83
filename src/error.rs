use crate::packet::error::PacketError;
use std::io;
use thiserror::Error;

/// The result type used throughout the crate.
pub type TraceResult<T> = Result<T, TraceError>;

/// A traceroute or ping error.
#[derive(Error, Debug)]
pub enum TraceError {
    /// The hostname could not be used for resolution.
    #[error("invalid hostname: {0}")]
    InvalidHostname(String),
    /// The resolver returned no address compatible with the address style.
    #[error("no suitable address found for {0}")]
    ResolutionFailed(String),
    /// The network or host is unreachable.
    #[error("network error: {0}")]
    NetworkError(io::Error),
    /// An operation timed out.
    #[error("timed out: {0}")]
    Timeout(String),
    /// Any other operating system error.
    #[error("system error: {0}")]
    SystemError(io::Error),
    /// The session configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// `start` was invoked while the session was resolving or running.
    #[error("session is already running")]
    AlreadyRunning,
    /// A stop-only operation was invoked while idle.
    #[error("session is not running")]
    NotRunning,
    /// `ping_once` was invoked while a continuous ping was running.
    #[error("continuous ping is running")]
    ContinuousRunning,
    /// `ping_once` was invoked while another single ping was in flight.
    #[error("a ping is already in progress")]
    AlreadyInProgress,
    /// A wire format could not be built.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),
}

impl From<io::Error> for TraceError {
    /// Classify an `io::Error` by errno.
    ///
    /// Unreachable-network conditions and syscall timeouts have their own
    /// kinds; everything else is a `SystemError`.
    fn from(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) if is_unreachable_error(code) => Self::NetworkError(err),
            Some(code) if is_timeout_error(code) => Self::Timeout(err.to_string()),
            _ => Self::SystemError(err),
        }
    }
}

#[cfg(unix)]
fn is_unreachable_error(code: i32) -> bool {
    matches!(
        nix::Error::from_i32(code),
        nix::Error::ENETUNREACH | nix::Error::EHOSTUNREACH
    )
}

#[cfg(unix)]
fn is_timeout_error(code: i32) -> bool {
    nix::Error::from_i32(code) == nix::Error::ETIMEDOUT
}

#[cfg(not(unix))]
fn is_unreachable_error(_code: i32) -> bool {
    false
}

#[cfg(not(unix))]
fn is_timeout_error(_code: i32) -> bool {
    false
}
