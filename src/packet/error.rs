use thiserror::Error;

/// A packet layer result.
pub type PacketResult<T> = std::result::Result<T, PacketError>;

/// A packet layer error.
#[derive(Error, Debug, Eq, PartialEq)]
pub enum PacketError {
    /// The buffer cannot hold the requested packet view.
    #[error("{kind} needs at least {minimum} bytes, have {provided}")]
    BufferTooSmall {
        kind: &'static str,
        minimum: usize,
        provided: usize,
    },
}
