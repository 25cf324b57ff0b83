use crate::codec::{self, probe_payload, IcmpCodec};
use crate::config::{defaults, AddrFamily, SessionConfig};
use crate::error::{TraceError, TraceResult};
use crate::net::Socket;
use crate::observer::PingObserver;
use crate::probe::{Classification, ProbeRecord, ProbeTable};
use crate::resolver::{self, Resolver};
use crate::session::{StopHandle, MAX_PACKET_SIZE, READ_TIMEOUT};
use crate::stats::{Statistics, StatsRecorder};
use crate::types::{ProbeIndex, Sequence, TimeToLive, TraceId};
use rand::Rng;
use std::collections::VecDeque;
use std::io;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// The lifecycle state of a pinger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingerState {
    /// Created or between pings.
    Idle,
    /// A continuous ping is running.
    Continuous,
    /// A single ping is in flight.
    OneShot,
    /// Terminated by an error.
    Failed,
    /// Terminated by `stop`.
    Stopped,
}

/// A continuous ping to a single target.
///
/// A reduced mode of the probe machinery: the TTL is left at the socket
/// default, one `EchoRequest` is emitted per interval and only matched
/// `EchoReply`s complete probes.  Replies unanswered for the configured
/// `hop_timeout` are counted as timeouts.
#[derive(Debug)]
pub struct ContinuousPinger<S, O> {
    hostname: String,
    config: SessionConfig,
    identifier: TraceId,
    observer: O,
    state: PingerState,
    table: ProbeTable,
    stats: StatsRecorder,
    latency_history: VecDeque<Duration>,
    sequence: Sequence,
    stop: Arc<AtomicBool>,
    marker: PhantomData<fn() -> S>,
}

impl<S: Socket, O: PingObserver> ContinuousPinger<S, O> {
    pub fn new(hostname: impl Into<String>, config: SessionConfig, observer: O) -> Self {
        Self {
            hostname: hostname.into(),
            config,
            identifier: TraceId(rand::thread_rng().gen()),
            observer,
            state: PingerState::Idle,
            table: ProbeTable::new(),
            stats: StatsRecorder::new(),
            latency_history: VecDeque::with_capacity(defaults::DEFAULT_LATENCY_HISTORY),
            sequence: Sequence(0),
            stop: Arc::new(AtomicBool::new(false)),
            marker: PhantomData,
        }
    }

    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    #[must_use]
    pub const fn identifier(&self) -> TraceId {
        self.identifier
    }

    #[must_use]
    pub const fn state(&self) -> PingerState {
        self.state
    }

    #[must_use]
    pub fn statistics(&self) -> Statistics {
        self.stats.snapshot()
    }

    /// The most recent round-trip times in emission order, oldest first.
    pub fn latency_history(&self) -> impl Iterator<Item = Duration> + '_ {
        self.latency_history.iter().copied()
    }

    #[must_use]
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// A handle which can stop this pinger from another thread.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new(Arc::clone(&self.stop))
    }

    /// Ping the target once per interval until stopped.
    ///
    /// An interval of zero suppresses periodic emission; the pinger then
    /// only listens.  Returns the final statistics when stopped.
    #[instrument(skip_all, fields(hostname = %self.hostname))]
    pub fn ping<R: Resolver>(
        &mut self,
        resolver: &R,
        interval: Duration,
    ) -> TraceResult<Statistics> {
        match self.state {
            PingerState::Continuous | PingerState::OneShot => {
                return Err(TraceError::AlreadyRunning)
            }
            _ => {}
        }
        let (target, family, socket) = match self.open(resolver) {
            Ok(opened) => opened,
            Err(err) => {
                self.state = PingerState::Failed;
                self.observer.on_failed(&err);
                return Err(err);
            }
        };
        self.state = PingerState::Continuous;
        self.observer.on_started(target.ip());
        let codec = IcmpCodec::new(self.identifier, self.config.privilege_mode);
        match self.run_continuous(&socket, &codec, family, target, interval) {
            Ok(statistics) => {
                self.state = PingerState::Stopped;
                self.table.clear();
                Ok(statistics)
            }
            Err(err) => {
                self.state = PingerState::Failed;
                self.table.clear();
                self.observer.on_failed(&err);
                Err(err)
            }
        }
    }

    fn run_continuous(
        &mut self,
        socket: &S,
        codec: &IcmpCodec,
        family: AddrFamily,
        target: SocketAddr,
        interval: Duration,
    ) -> TraceResult<Statistics> {
        let reply_timeout = self.config.hop_timeout;
        let mut next_send = Instant::now();
        while !self.stop.load(Ordering::Relaxed) {
            let now = Instant::now();
            if !interval.is_zero() && now >= next_send {
                if let Err(err) = self.send_probe(socket, codec, family, target) {
                    tracing::warn!(%err, "ping send failed");
                }
                next_send = now + interval;
            }
            let wait = if interval.is_zero() {
                READ_TIMEOUT
            } else {
                next_send
                    .saturating_duration_since(Instant::now())
                    .min(READ_TIMEOUT)
            };
            self.poll_reply(socket, codec, family, wait)?;
            self.expire_probes(reply_timeout);
        }
        Ok(self.stats.snapshot())
    }

    /// Send a single probe and wait for its reply.
    ///
    /// Returns the round-trip time or [`TraceError::Timeout`] if no reply
    /// arrives within `timeout`.
    #[instrument(skip_all, fields(hostname = %self.hostname))]
    pub fn ping_once<R: Resolver>(
        &mut self,
        resolver: &R,
        timeout: Duration,
    ) -> TraceResult<Duration> {
        match self.state {
            PingerState::Continuous => return Err(TraceError::ContinuousRunning),
            PingerState::OneShot => return Err(TraceError::AlreadyInProgress),
            _ => {}
        }
        let (target, family, socket) = match self.open(resolver) {
            Ok(opened) => opened,
            Err(err) => {
                self.state = PingerState::Failed;
                self.observer.on_failed(&err);
                return Err(err);
            }
        };
        self.state = PingerState::OneShot;
        self.observer.on_started(target.ip());
        let codec = IcmpCodec::new(self.identifier, self.config.privilege_mode);
        match self.run_once(&socket, &codec, family, target, timeout) {
            Ok(rtt) => {
                self.state = PingerState::Idle;
                Ok(rtt)
            }
            Err(err @ TraceError::Timeout(_)) => {
                self.state = PingerState::Idle;
                Err(err)
            }
            Err(err) => {
                self.state = PingerState::Failed;
                self.table.clear();
                self.observer.on_failed(&err);
                Err(err)
            }
        }
    }

    fn run_once(
        &mut self,
        socket: &S,
        codec: &IcmpCodec,
        family: AddrFamily,
        target: SocketAddr,
        timeout: Duration,
    ) -> TraceResult<Duration> {
        let sequence = self.send_probe(socket, codec, family, target)?;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            if let Some((seq, rtt)) =
                self.poll_reply(socket, codec, family, remaining.min(READ_TIMEOUT))?
            {
                if seq == sequence {
                    return Ok(rtt);
                }
            }
        }
        self.table.take(sequence);
        self.stats.record_timeout();
        self.observer.on_timeout(sequence);
        self.observer.on_statistics(&self.stats.snapshot());
        Err(TraceError::Timeout(format!("no reply within {timeout:?}")))
    }

    /// Force the pinger into the stopped state.  Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.table.clear();
        self.state = PingerState::Stopped;
    }

    fn open(&mut self, resolver: &impl Resolver) -> TraceResult<(SocketAddr, AddrFamily, S)> {
        self.config.validate()?;
        self.stop.store(false, Ordering::Relaxed);
        self.stats.reset();
        self.latency_history.clear();
        self.table.clear();
        self.sequence = Sequence(0);
        let addrs = resolver.resolve(&self.hostname, self.config.address_style)?;
        let target = resolver::select_addr(&self.hostname, addrs, self.config.address_style)?;
        let family = AddrFamily::of(&target);
        // The TTL stays at the socket default.
        let socket = match family {
            AddrFamily::Ipv4 => S::new_icmp_ipv4(self.config.privilege_mode),
            AddrFamily::Ipv6 => S::new_icmp_ipv6(self.config.privilege_mode),
        }
        .map_err(TraceError::from)?;
        Ok((target, family, socket))
    }

    fn send_probe(
        &mut self,
        socket: &S,
        codec: &IcmpCodec,
        family: AddrFamily,
        target: SocketAddr,
    ) -> TraceResult<Sequence> {
        let sequence = self.sequence;
        self.sequence = sequence.next();
        let payload = probe_payload(TimeToLive(0), ProbeIndex(0));
        let bytes = codec.build_echo(family, sequence, &payload)?;
        self.table.record(ProbeRecord::new(
            sequence,
            TimeToLive(0),
            ProbeIndex(0),
            Instant::now(),
        ));
        match socket.send_to(&bytes, target) {
            Ok(_) => {
                self.stats.record_sent();
                self.observer.on_probe_sent(sequence);
                self.observer.on_statistics(&self.stats.snapshot());
                Ok(sequence)
            }
            Err(err) => {
                self.table.take(sequence);
                Err(TraceError::from(err))
            }
        }
    }

    /// Read and process at most one inbound datagram.
    ///
    /// Returns the sequence and round-trip time of a matched reply.
    fn poll_reply(
        &mut self,
        socket: &S,
        codec: &IcmpCodec,
        family: AddrFamily,
        wait: Duration,
    ) -> TraceResult<Option<(Sequence, Duration)>> {
        if !socket.is_readable(wait).map_err(TraceError::from)? {
            return Ok(None);
        }
        let mut buf = [0_u8; MAX_PACKET_SIZE];
        let len = match socket.recv_from(&mut buf) {
            Ok((len, _)) => len,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(err) => return Err(TraceError::from(err)),
        };
        match codec.classify(family, &buf[..len]) {
            Classification::EchoReply { sequence, .. } => {
                let Some(record) = self.table.take(Sequence(sequence)) else {
                    return Ok(None);
                };
                let rtt = record.sent_at.elapsed();
                self.stats.record_response(rtt);
                push_bounded(
                    &mut self.latency_history,
                    rtt,
                    defaults::DEFAULT_LATENCY_HISTORY,
                );
                self.observer.on_reply(record.sequence, rtt);
                self.observer.on_statistics(&self.stats.snapshot());
                Ok(Some((record.sequence, rtt)))
            }
            Classification::TimeExceeded { .. } | Classification::Unreachable { .. } => {
                if let Some(description) = codec::describe(family, &buf[..len]) {
                    self.observer.on_unexpected(&description);
                }
                Ok(None)
            }
            Classification::Other | Classification::Malformed => Ok(None),
        }
    }

    /// Count and report probes which have gone unanswered too long.
    fn expire_probes(&mut self, reply_timeout: Duration) {
        for record in self.table.sweep(Instant::now(), reply_timeout) {
            self.stats.record_timeout();
            self.observer.on_timeout(record.sequence);
            self.observer.on_statistics(&self.stats.snapshot());
        }
    }
}

/// Retain only the most recent entries.
fn push_bounded(history: &mut VecDeque<Duration>, rtt: Duration, capacity: usize) {
    if history.len() == capacity {
        history.pop_front();
    }
    history.push_back(rtt);
}
