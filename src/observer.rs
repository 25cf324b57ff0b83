use crate::error::TraceError;
use crate::probe::HopResult;
use crate::session::SessionResult;
use crate::stats::Statistics;
use crate::types::Sequence;
use std::net::IpAddr;
use std::time::Duration;

/// The capability through which a traceroute session reports progress.
///
/// All methods fire on the thread driving the session and default to
/// no-ops.  Implementations must not call back into the same session's
/// `start` or `stop` from within a callback.
#[allow(unused_variables)]
pub trait Observer {
    /// The session has a bound socket and is about to probe.
    fn on_started(&mut self, target: IpAddr) {}

    /// The session failed; no further events will fire.
    fn on_failed(&mut self, error: &TraceError) {}

    /// A probe was sent for a hop.
    fn on_probe_sent(&mut self, hop: u8, sequence: Sequence) {}

    /// A response was received for a hop.
    fn on_response(&mut self, hop: u8, rtt: Duration) {}

    /// All probes for a hop timed out.
    fn on_hop_timeout(&mut self, hop: u8) {}

    /// The authoritative per-hop result.
    fn on_hop_completed(&mut self, result: &HopResult) {}

    /// Fires after every counter change.
    fn on_statistics(&mut self, statistics: &Statistics) {}

    /// The session completed; no further events will fire.
    fn on_finished(&mut self, result: &SessionResult) {}
}

/// The capability through which a continuous ping reports progress.
#[allow(unused_variables)]
pub trait PingObserver {
    /// The pinger has a bound socket and is about to send.
    fn on_started(&mut self, target: IpAddr) {}

    /// The pinger failed; no further events will fire.
    fn on_failed(&mut self, error: &TraceError) {}

    /// An `EchoRequest` was sent.
    fn on_probe_sent(&mut self, sequence: Sequence) {}

    /// A matched `EchoReply` arrived.
    fn on_reply(&mut self, sequence: Sequence, rtt: Duration) {}

    /// A probe went unanswered for the reply timeout.
    fn on_timeout(&mut self, sequence: Sequence) {}

    /// A packet other than a matched `EchoReply` arrived.
    fn on_unexpected(&mut self, description: &str) {}

    /// Fires after every counter change.
    fn on_statistics(&mut self, statistics: &Statistics) {}
}

/// An observer which ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {}

impl PingObserver for NullObserver {}
