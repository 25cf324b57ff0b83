use crate::codec::IcmpCodec;
use crate::config::{AddrFamily, SessionConfig};
use crate::error::{TraceError, TraceResult};
use crate::hop::{HopContext, HopController, Progress, ReplyOutcome, TimeoutOutcome};
use crate::net::Socket;
use crate::observer::Observer;
use crate::probe::{HopResult, ProbeTable};
use crate::resolver::{self, Resolver};
use crate::stats::{Statistics, StatsRecorder};
use crate::types::TraceId;
use rand::Rng;
use std::io;
use std::marker::PhantomData;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// The largest inbound datagram the engine will read.
pub(crate) const MAX_PACKET_SIZE: usize = 1024;

/// How long a single readiness wait may block.
///
/// Slicing the waits keeps the loop responsive to stop requests and to the
/// per-hop deadline.
pub(crate) const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// The lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created but never started.
    Idle,
    /// Waiting for the resolver.
    Resolving,
    /// Probing with a bound socket.
    Running,
    /// Completed by destination arrival or hop exhaustion.
    Finished,
    /// Terminated by an error.
    Failed,
    /// Terminated by `stop`.
    Stopped,
}

/// A handle through which a running session can be asked to stop.
///
/// The request is honoured at the next suspension point.
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub(crate) fn new(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    /// Ask the session to stop.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// The terminal outcome of a session.
#[derive(Debug, Clone)]
pub struct SessionResult {
    /// The hostname the session was created for.
    pub target_hostname: String,
    /// The resolved target address.
    pub target_address: IpAddr,
    /// The configured hop limit.
    pub max_hops: u8,
    /// The largest hop number for which a result was emitted.
    pub actual_hops: u8,
    /// Total elapsed time of the trace.
    pub total_time: Duration,
    /// Every emitted hop result, in emission order.
    pub hops: Vec<HopResult>,
    /// True iff the final emitted hop was the destination.
    pub reached_target: bool,
    /// Final counters.
    pub statistics: Statistics,
}

/// A single traceroute session.
///
/// All work happens on the calling thread: `start` resolves the target,
/// binds a socket and drives probing to completion, invoking the observer
/// along the way.  A [`StopHandle`] taken before `start` allows another
/// thread to request cancellation.
#[derive(Debug)]
pub struct Session<S, O> {
    hostname: String,
    config: SessionConfig,
    identifier: TraceId,
    observer: O,
    state: SessionState,
    table: ProbeTable,
    stats: StatsRecorder,
    stop: Arc<AtomicBool>,
    marker: PhantomData<fn() -> S>,
}

impl<S: Socket, O: Observer> Session<S, O> {
    /// Create a session for a hostname.
    ///
    /// The session identifier is drawn at random so that concurrent
    /// sessions on the same host can be told apart.
    pub fn new(hostname: impl Into<String>, config: SessionConfig, observer: O) -> Self {
        Self {
            hostname: hostname.into(),
            config,
            identifier: TraceId(rand::thread_rng().gen()),
            observer,
            state: SessionState::Idle,
            table: ProbeTable::new(),
            stats: StatsRecorder::new(),
            stop: Arc::new(AtomicBool::new(false)),
            marker: PhantomData,
        }
    }

    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub const fn identifier(&self) -> TraceId {
        self.identifier
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.state, SessionState::Resolving | SessionState::Running)
    }

    #[must_use]
    pub fn statistics(&self) -> Statistics {
        self.stats.snapshot()
    }

    #[must_use]
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// A handle which can stop this session from another thread.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop),
        }
    }

    /// Resolve the target and trace the path to it.
    ///
    /// Runs to completion and returns the terminal result, which is also
    /// delivered via `on_finished`.  Errors are delivered via `on_failed`.
    #[instrument(skip_all, fields(hostname = %self.hostname))]
    pub fn start<R: Resolver>(&mut self, resolver: &R) -> TraceResult<SessionResult> {
        match self.state {
            SessionState::Resolving | SessionState::Running => {
                return Err(TraceError::AlreadyRunning)
            }
            SessionState::Idle
            | SessionState::Finished
            | SessionState::Failed
            | SessionState::Stopped => {}
        }
        if let Err(err) = self.config.validate() {
            self.state = SessionState::Failed;
            self.observer.on_failed(&err);
            return Err(err);
        }
        self.table.clear();
        self.stats.reset();
        self.stop.store(false, Ordering::Relaxed);
        self.state = SessionState::Resolving;
        match self.run(resolver) {
            Ok(result) => {
                self.state = if self.stop.load(Ordering::Relaxed) {
                    SessionState::Stopped
                } else {
                    SessionState::Finished
                };
                self.observer.on_finished(&result);
                Ok(result)
            }
            Err(err) => {
                self.state = SessionState::Failed;
                self.table.clear();
                self.observer.on_failed(&err);
                Err(err)
            }
        }
    }

    /// Force the session into the stopped state.
    ///
    /// Safe to call in any state and idempotent.  A running session is
    /// stopped via its [`StopHandle`]; this method handles the not-running
    /// cases and clears any leftover probe state.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.table.clear();
        self.state = SessionState::Stopped;
    }

    fn run<R: Resolver>(&mut self, resolver: &R) -> TraceResult<SessionResult> {
        let started_at = Instant::now();
        let addrs = resolver.resolve(&self.hostname, self.config.address_style)?;
        let target = resolver::select_addr(&self.hostname, addrs, self.config.address_style)?;
        let family = AddrFamily::of(&target);
        let socket = match family {
            AddrFamily::Ipv4 => S::new_icmp_ipv4(self.config.privilege_mode),
            AddrFamily::Ipv6 => S::new_icmp_ipv6(self.config.privilege_mode),
        }
        .map_err(TraceError::from)?;
        self.state = SessionState::Running;
        self.observer.on_started(target.ip());
        let codec = IcmpCodec::new(self.identifier, self.config.privilege_mode);
        let max_age = 2 * self.config.hop_timeout;
        let mut controller = HopController::new(&self.config);
        let mut hops: Vec<HopResult> = Vec::new();
        {
            let mut cx = HopContext {
                socket: &socket,
                codec: &codec,
                family,
                target,
                table: &mut self.table,
                stats: &mut self.stats,
                observer: &mut self.observer,
            };
            let mut progress = controller.enter_next_hop(&mut cx)?;
            while progress == Progress::Probing && !self.stop.load(Ordering::Relaxed) {
                let wait = controller.deadline().map_or(READ_TIMEOUT, |deadline| {
                    deadline
                        .saturating_duration_since(Instant::now())
                        .min(READ_TIMEOUT)
                });
                if cx.socket.is_readable(wait).map_err(TraceError::from)? {
                    let mut buf = [0_u8; MAX_PACKET_SIZE];
                    match cx.socket.recv_from(&mut buf) {
                        Ok((len, from)) => {
                            let classification = codec.classify(family, &buf[..len]);
                            match controller.on_reply(classification, from, &mut cx) {
                                ReplyOutcome::Dropped => {}
                                ReplyOutcome::Completed(result) => {
                                    cx.observer.on_hop_completed(&result);
                                    let is_destination = result.is_destination;
                                    hops.push(result);
                                    if is_destination {
                                        break;
                                    }
                                    progress = controller.enter_next_hop(&mut cx)?;
                                }
                            }
                        }
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                        Err(err) => return Err(TraceError::from(err)),
                    }
                }
                match controller.on_deadline(Instant::now(), &mut cx) {
                    TimeoutOutcome::Ignored => {}
                    TimeoutOutcome::Expired(expired) => {
                        if let Some(result) = expired {
                            cx.observer.on_hop_completed(&result);
                            hops.push(result);
                        }
                        progress = controller.enter_next_hop(&mut cx)?;
                    }
                }
                cx.table.sweep(Instant::now(), max_age);
            }
        }
        let reached_target = hops.last().map_or(false, |hop| hop.is_destination);
        let actual_hops = hops.last().map_or(0, |hop| hop.hop_number);
        Ok(SessionResult {
            target_hostname: self.hostname.clone(),
            target_address: target.ip(),
            max_hops: self.config.max_hops,
            actual_hops,
            total_time: started_at.elapsed(),
            hops,
            reached_target,
            statistics: self.stats.snapshot(),
        })
    }
}
