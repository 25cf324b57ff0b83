use crate::codec::{probe_payload, IcmpCodec};
use crate::config::{AddrFamily, SessionConfig};
use crate::error::{TraceError, TraceResult};
use crate::net::Socket;
use crate::observer::Observer;
use crate::probe::{Classification, HopResult, ProbeRecord, ProbeTable};
use crate::stats::StatsRecorder;
use crate::types::{ProbeIndex, Sequence, TimeToLive};
use std::io;
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::instrument;

/// The collaborators a hop controller acts through.
pub(crate) struct HopContext<'a, S, O> {
    pub socket: &'a S,
    pub codec: &'a IcmpCodec,
    pub family: AddrFamily,
    pub target: SocketAddr,
    pub table: &'a mut ProbeTable,
    pub stats: &'a mut StatsRecorder,
    pub observer: &'a mut O,
}

/// Whether the trace continues after entering a hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    /// Probes are in flight for the current hop.
    Probing,
    /// Every permitted hop has been probed.
    Exhausted,
}

/// The effect of a classified inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReplyOutcome {
    /// The datagram was foreign, malformed or late; nothing to report.
    Dropped,
    /// A probe of the current hop was answered.
    Completed(HopResult),
}

/// The effect of the per-hop deadline passing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TimeoutOutcome {
    /// No armed deadline has passed.
    Ignored,
    /// The deadline fired; a timeout result is present unless every probe
    /// for the hop had already been answered.
    Expired(Option<HopResult>),
}

/// Drives TTL setup, probe emission and per-hop timing.
///
/// Progression is "fast": the first reply for the current hop cancels the
/// deadline and moves to the next hop.  Replies for a hop which has already
/// advanced are dropped so that emitted hop numbers never go backwards.
#[derive(Debug)]
pub(crate) struct HopController {
    max_hops: TimeToLive,
    probes_per_hop: u8,
    hop_timeout: Duration,
    probe_gap: Duration,
    current_hop: TimeToLive,
    deadline: Option<(TimeToLive, Instant)>,
    sequence: Sequence,
    wrapped: bool,
}

impl HopController {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            max_hops: TimeToLive(config.max_hops),
            probes_per_hop: config.probes_per_hop,
            hop_timeout: config.hop_timeout,
            probe_gap: config.probe_gap,
            current_hop: TimeToLive(0),
            deadline: None,
            sequence: Sequence(0),
            wrapped: false,
        }
    }

    /// The hop currently being probed, 0 when not started.
    #[cfg(test)]
    pub const fn current_hop(&self) -> TimeToLive {
        self.current_hop
    }

    /// The armed per-hop deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.map(|(_, deadline)| deadline)
    }

    /// Move to the next hop and send its probes.
    ///
    /// Sets the TTL or hop limit on the socket (fatal on failure), sends
    /// `probes_per_hop` probes separated by the inter-probe gap and arms
    /// the per-hop deadline.  A probe which fails to send is logged and
    /// skipped; if every probe for the hop fails the error is fatal.
    #[instrument(skip_all, fields(hop = self.current_hop.0.saturating_add(1)))]
    pub fn enter_next_hop<S: Socket, O: Observer>(
        &mut self,
        cx: &mut HopContext<'_, S, O>,
    ) -> TraceResult<Progress> {
        let next = match self.current_hop.0.checked_add(1) {
            Some(next) if next <= self.max_hops.0 => next,
            _ => return Ok(Progress::Exhausted),
        };
        self.current_hop = TimeToLive(next);
        match cx.family {
            AddrFamily::Ipv4 => cx.socket.set_ttl(next),
            AddrFamily::Ipv6 => cx.socket.set_unicast_hops_v6(next),
        }
        .map_err(TraceError::from)?;
        let mut sent = 0_u8;
        let mut last_err = None;
        for index in 0..self.probes_per_hop {
            let sequence = self.next_sequence();
            let payload = probe_payload(self.current_hop, ProbeIndex(index));
            let bytes = cx.codec.build_echo(cx.family, sequence, &payload)?;
            cx.table.record(ProbeRecord::new(
                sequence,
                self.current_hop,
                ProbeIndex(index),
                Instant::now(),
            ));
            match cx.socket.send_to(&bytes, cx.target) {
                Ok(_) => {
                    sent += 1;
                    cx.stats.record_sent();
                    cx.observer.on_probe_sent(next, sequence);
                    cx.observer.on_statistics(&cx.stats.snapshot());
                }
                Err(err) => {
                    tracing::warn!(hop = next, sequence = sequence.0, %err, "probe send failed");
                    cx.table.take(sequence);
                    last_err = Some(err);
                }
            }
            if index + 1 < self.probes_per_hop {
                thread::sleep(self.probe_gap);
            }
        }
        if sent == 0 {
            let err = last_err
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "no probes sent"));
            return Err(TraceError::from(err));
        }
        self.deadline = Some((self.current_hop, Instant::now() + self.hop_timeout));
        Ok(Progress::Probing)
    }

    /// Correlate a classified datagram with an outstanding probe.
    pub fn on_reply<S: Socket, O: Observer>(
        &mut self,
        classification: Classification,
        from: Option<SocketAddr>,
        cx: &mut HopContext<'_, S, O>,
    ) -> ReplyOutcome {
        let (sequence, is_destination) = match classification {
            Classification::EchoReply { sequence, .. } => (sequence, true),
            Classification::TimeExceeded { sequence, .. }
            | Classification::Unreachable { sequence, .. } => (sequence, false),
            Classification::Other | Classification::Malformed => return ReplyOutcome::Dropped,
        };
        let Some(record) = cx.table.take(Sequence(sequence)) else {
            if self.wrapped {
                tracing::debug!(sequence, "unmatched reply after sequence wrap");
            }
            return ReplyOutcome::Dropped;
        };
        if record.hop != self.current_hop {
            tracing::debug!(
                hop = record.hop.0,
                current = self.current_hop.0,
                "dropped late reply for advanced hop"
            );
            return ReplyOutcome::Dropped;
        }
        let rtt = record.sent_at.elapsed();
        cx.stats.record_response(rtt);
        cx.observer.on_response(record.hop.0, rtt);
        cx.observer.on_statistics(&cx.stats.snapshot());
        self.deadline = None;
        ReplyOutcome::Completed(HopResult {
            hop_number: record.hop.0,
            router: from.map(|addr| addr.ip()),
            rtt: Some(rtt),
            is_destination,
            is_timeout: false,
            sequence: record.sequence,
            probe_index: record.probe_index,
            observed_at: SystemTime::now(),
        })
    }

    /// React to the per-hop deadline, if it has passed.
    pub fn on_deadline<S: Socket, O: Observer>(
        &mut self,
        now: Instant,
        cx: &mut HopContext<'_, S, O>,
    ) -> TimeoutOutcome {
        let Some((hop, deadline)) = self.deadline else {
            return TimeoutOutcome::Ignored;
        };
        if now < deadline {
            return TimeoutOutcome::Ignored;
        }
        self.deadline = None;
        if hop != self.current_hop {
            return TimeoutOutcome::Ignored;
        }
        let collected = cx.table.collect_for_hop(hop);
        if collected.is_empty() {
            return TimeoutOutcome::Expired(None);
        }
        for _ in &collected {
            cx.stats.record_timeout();
        }
        cx.observer.on_hop_timeout(hop.0);
        cx.observer.on_statistics(&cx.stats.snapshot());
        let first = collected[0];
        TimeoutOutcome::Expired(Some(HopResult {
            hop_number: hop.0,
            router: None,
            rtt: Some(first.sent_at.elapsed()),
            is_destination: false,
            is_timeout: true,
            sequence: first.sequence,
            probe_index: first.probe_index,
            observed_at: SystemTime::now(),
        }))
    }

    fn next_sequence(&mut self) -> Sequence {
        let sequence = self.sequence;
        self.sequence = sequence.next();
        if self.sequence == Sequence(0) {
            self.wrapped = true;
            tracing::debug!("sequence counter wrapped");
        }
        sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrivilegeMode;
    use crate::observer::NullObserver;
    use crate::types::TraceId;
    use std::cell::{Cell, RefCell};
    use std::net::{IpAddr, Ipv4Addr};

    #[derive(Debug, Default)]
    struct MockSocket {
        ttl: Cell<u8>,
        sent: RefCell<Vec<Vec<u8>>>,
        fail_sends: Cell<bool>,
    }

    impl Socket for MockSocket {
        fn new_icmp_ipv4(_privilege_mode: PrivilegeMode) -> io::Result<Self> {
            Ok(Self::default())
        }

        fn new_icmp_ipv6(_privilege_mode: PrivilegeMode) -> io::Result<Self> {
            Ok(Self::default())
        }

        fn set_ttl(&self, ttl: u8) -> io::Result<()> {
            self.ttl.set(ttl);
            Ok(())
        }

        fn ttl(&self) -> io::Result<u8> {
            Ok(self.ttl.get())
        }

        fn set_unicast_hops_v6(&self, hops: u8) -> io::Result<()> {
            self.ttl.set(hops);
            Ok(())
        }

        fn send_to(&self, buf: &[u8], _addr: SocketAddr) -> io::Result<usize> {
            if self.fail_sends.get() {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            self.sent.borrow_mut().push(buf.to_vec());
            Ok(buf.len())
        }

        fn is_readable(&self, _timeout: Duration) -> io::Result<bool> {
            Ok(false)
        }

        fn recv_from(&self, _buf: &mut [u8]) -> io::Result<(usize, Option<SocketAddr>)> {
            Err(io::Error::from(io::ErrorKind::WouldBlock))
        }
    }

    struct Fixture {
        socket: MockSocket,
        codec: IcmpCodec,
        table: ProbeTable,
        stats: StatsRecorder,
        observer: NullObserver,
        target: SocketAddr,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                socket: MockSocket::default(),
                codec: IcmpCodec::new(TraceId(0x0101), PrivilegeMode::Privileged),
                table: ProbeTable::new(),
                stats: StatsRecorder::new(),
                observer: NullObserver,
                target: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 0),
            }
        }

        fn cx(&mut self) -> HopContext<'_, MockSocket, NullObserver> {
            HopContext {
                socket: &self.socket,
                codec: &self.codec,
                family: AddrFamily::Ipv4,
                target: self.target,
                table: &mut self.table,
                stats: &mut self.stats,
                observer: &mut self.observer,
            }
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            max_hops: 3,
            hop_timeout: Duration::from_millis(100),
            probes_per_hop: 2,
            probe_gap: Duration::from_millis(1),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_enter_hop_sets_ttl_and_sends_probes() {
        let mut fixture = Fixture::new();
        let mut controller = HopController::new(&config());
        let progress = controller.enter_next_hop(&mut fixture.cx()).unwrap();
        assert_eq!(Progress::Probing, progress);
        assert_eq!(TimeToLive(1), controller.current_hop());
        assert_eq!(1, fixture.socket.ttl.get());
        assert_eq!(2, fixture.socket.sent.borrow().len());
        assert_eq!(2, fixture.table.len());
        assert!(controller.deadline().is_some());
        assert_eq!(2, fixture.stats.snapshot().probes_sent);
    }

    #[test]
    fn test_max_hops_exhausted() {
        let mut fixture = Fixture::new();
        let mut controller = HopController::new(&config());
        for _ in 0..3 {
            assert_eq!(
                Progress::Probing,
                controller.enter_next_hop(&mut fixture.cx()).unwrap()
            );
        }
        assert_eq!(
            Progress::Exhausted,
            controller.enter_next_hop(&mut fixture.cx()).unwrap()
        );
    }

    #[test]
    fn test_all_sends_failing_is_fatal() {
        let mut fixture = Fixture::new();
        fixture.socket.fail_sends.set(true);
        let mut controller = HopController::new(&config());
        let err = controller.enter_next_hop(&mut fixture.cx()).unwrap_err();
        assert!(matches!(err, TraceError::SystemError(_)));
        assert!(fixture.table.is_empty());
    }

    #[test]
    fn test_reply_completes_hop_and_cancels_deadline() {
        let mut fixture = Fixture::new();
        let mut controller = HopController::new(&config());
        controller.enter_next_hop(&mut fixture.cx()).unwrap();
        let classification = Classification::TimeExceeded {
            identifier: 0x0101,
            sequence: 0,
            code: 0,
        };
        let from = Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 0));
        let outcome = controller.on_reply(classification, from, &mut fixture.cx());
        let ReplyOutcome::Completed(result) = outcome else {
            panic!("expected completed hop");
        };
        assert_eq!(1, result.hop_number);
        assert_eq!(Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))), result.router);
        assert!(!result.is_destination);
        assert!(!result.is_timeout);
        assert!(controller.deadline().is_none());
        assert_eq!(1, fixture.stats.snapshot().responses_received);
    }

    #[test]
    fn test_echo_reply_marks_destination() {
        let mut fixture = Fixture::new();
        let mut controller = HopController::new(&config());
        controller.enter_next_hop(&mut fixture.cx()).unwrap();
        let classification = Classification::EchoReply {
            identifier: 0x0101,
            sequence: 1,
        };
        let outcome = controller.on_reply(classification, None, &mut fixture.cx());
        let ReplyOutcome::Completed(result) = outcome else {
            panic!("expected completed hop");
        };
        assert!(result.is_destination);
    }

    #[test]
    fn test_unknown_sequence_dropped() {
        let mut fixture = Fixture::new();
        let mut controller = HopController::new(&config());
        controller.enter_next_hop(&mut fixture.cx()).unwrap();
        let classification = Classification::EchoReply {
            identifier: 0x0101,
            sequence: 999,
        };
        assert_eq!(
            ReplyOutcome::Dropped,
            controller.on_reply(classification, None, &mut fixture.cx())
        );
    }

    #[test]
    fn test_late_reply_for_advanced_hop_dropped() {
        let mut fixture = Fixture::new();
        let mut controller = HopController::new(&config());
        controller.enter_next_hop(&mut fixture.cx()).unwrap();
        // First reply advances the hop; the second probe of hop 1 is still
        // outstanding when its reply finally arrives.
        let first = Classification::TimeExceeded {
            identifier: 0x0101,
            sequence: 0,
            code: 0,
        };
        assert!(matches!(
            controller.on_reply(first, None, &mut fixture.cx()),
            ReplyOutcome::Completed(_)
        ));
        controller.enter_next_hop(&mut fixture.cx()).unwrap();
        let late = Classification::TimeExceeded {
            identifier: 0x0101,
            sequence: 1,
            code: 0,
        };
        assert_eq!(
            ReplyOutcome::Dropped,
            controller.on_reply(late, None, &mut fixture.cx())
        );
    }

    #[test]
    fn test_deadline_expiry_emits_timeout_result() {
        let mut fixture = Fixture::new();
        let mut controller = HopController::new(&config());
        controller.enter_next_hop(&mut fixture.cx()).unwrap();
        let later = Instant::now() + Duration::from_secs(1);
        let outcome = controller.on_deadline(later, &mut fixture.cx());
        let TimeoutOutcome::Expired(Some(result)) = outcome else {
            panic!("expected expired deadline with result");
        };
        assert_eq!(1, result.hop_number);
        assert!(result.is_timeout);
        assert_eq!(None, result.router);
        assert_eq!(ProbeIndex(0), result.probe_index);
        assert_eq!(2, fixture.stats.snapshot().timeouts);
        assert!(fixture.table.is_empty());
    }

    #[test]
    fn test_deadline_not_yet_due_ignored() {
        let mut fixture = Fixture::new();
        let mut controller = HopController::new(&config());
        controller.enter_next_hop(&mut fixture.cx()).unwrap();
        assert_eq!(
            TimeoutOutcome::Ignored,
            controller.on_deadline(Instant::now(), &mut fixture.cx())
        );
    }

    #[test]
    fn test_sequence_allocation_is_monotonic() {
        let mut fixture = Fixture::new();
        let mut controller = HopController::new(&config());
        controller.enter_next_hop(&mut fixture.cx()).unwrap();
        controller.enter_next_hop(&mut fixture.cx()).unwrap();
        let mut sequences: Vec<u16> = fixture
            .table
            .collect_for_hop(TimeToLive(1))
            .iter()
            .chain(fixture.table.collect_for_hop(TimeToLive(2)).iter())
            .map(|record| record.sequence.0)
            .collect();
        sequences.sort_unstable();
        assert_eq!(vec![0, 1, 2, 3], sequences);
    }
}
