/// The socket capability.
pub mod socket;

/// The socket implementation for this platform.
#[cfg(unix)]
pub mod platform;

pub use socket::Socket;

/// The platform socket implementation.
#[cfg(unix)]
pub type SocketImpl = platform::NativeSocket;
