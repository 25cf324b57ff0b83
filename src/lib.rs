#![doc = include_str!("../README.md")]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::redundant_field_names,
    clippy::option_if_let_else,
    clippy::missing_const_for_fn,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc
)]
#![deny(unsafe_code)]

mod builder;
mod codec;
mod config;
mod error;
mod hop;
mod observer;
mod pinger;
mod probe;
mod resolver;
mod session;
mod stats;
mod types;

/// Socket capability and platform implementation.
pub mod net;

/// Packet wire formats.
pub mod packet;

pub use builder::Builder;
pub use codec::{decode_probe_payload, describe, probe_payload, IcmpCodec, PROBE_PAYLOAD_SIZE};
pub use config::{defaults, AddrFamily, AddressStyle, PrivilegeMode, SessionConfig};
pub use error::{TraceError, TraceResult};
pub use net::Socket;
#[cfg(unix)]
pub use net::SocketImpl;
pub use observer::{NullObserver, Observer, PingObserver};
pub use pinger::{ContinuousPinger, PingerState};
pub use probe::{Classification, HopResult, ProbeRecord, ProbeTable};
pub use resolver::{Resolver, SystemResolver};
pub use session::{Session, SessionResult, SessionState, StopHandle};
pub use stats::{Statistics, StatsRecorder};
pub use types::{ProbeIndex, Sequence, TimeToLive, TraceId};
