//! A scripted in-memory socket and event-recording observers.
//!
//! The simulation substitutes the engine's socket seam: probes sent through
//! a `SimSocket` are answered according to a script installed on the test
//! thread before the session or pinger opens its socket.

use hoptrace::packet::icmpv4::{ErrorPacket, IcmpCode, IcmpType};
use hoptrace::packet::ipv4::Ipv4Packet;
use hoptrace::packet::IpProtocol;
use hoptrace::{
    AddressStyle, HopResult, Observer, PingObserver, PrivilegeMode, Resolver, Sequence, Socket,
    TraceError, TraceResult,
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// What the simulated network does with a probe.
#[derive(Debug, Clone, Copy)]
pub enum SimResponse {
    /// A router returns Time Exceeded, embedding the probe.
    TimeExceeded(Ipv4Addr),
    /// The target returns an Echo Reply.
    EchoReply(Ipv4Addr),
    /// A router returns Destination Unreachable with the given code.
    Unreachable(Ipv4Addr, u8),
    /// Time Exceeded whose embedded probe carries a different identifier.
    ForeignTimeExceeded(Ipv4Addr),
    /// A few meaningless bytes arrive.
    Garbage(Ipv4Addr),
    /// The probe is dropped.
    Silent,
    /// The send itself fails.
    SendError,
}

/// How probes map to responses.
#[derive(Debug, Clone)]
pub enum Script {
    /// Indexed by the socket TTL at send time, 1-based.
    PerTtl(Vec<SimResponse>),
    /// Indexed by send order; sends past the end get the fallback.
    PerProbe(Vec<SimResponse>, SimResponse),
}

thread_local! {
    static NEXT_SCRIPT: RefCell<Option<Script>> = RefCell::new(None);
}

/// Install the script consumed by the next `SimSocket` on this thread.
pub fn install_script(script: Script) {
    NEXT_SCRIPT.with(|slot| *slot.borrow_mut() = Some(script));
}

#[derive(Debug)]
struct Inner {
    script: Script,
    ttl: u8,
    sends: usize,
    rx: VecDeque<(Vec<u8>, SocketAddr)>,
}

/// A socket whose network is a script.
#[derive(Debug)]
pub struct SimSocket {
    inner: RefCell<Inner>,
}

impl SimSocket {
    fn open() -> Self {
        let script = NEXT_SCRIPT
            .with(|slot| slot.borrow_mut().take())
            .unwrap_or(Script::PerTtl(Vec::new()));
        Self {
            inner: RefCell::new(Inner {
                script,
                ttl: 64,
                sends: 0,
                rx: VecDeque::new(),
            }),
        }
    }
}

impl Socket for SimSocket {
    fn new_icmp_ipv4(_privilege_mode: PrivilegeMode) -> io::Result<Self> {
        Ok(Self::open())
    }

    fn new_icmp_ipv6(_privilege_mode: PrivilegeMode) -> io::Result<Self> {
        Ok(Self::open())
    }

    fn set_ttl(&self, ttl: u8) -> io::Result<()> {
        self.inner.borrow_mut().ttl = ttl;
        Ok(())
    }

    fn ttl(&self) -> io::Result<u8> {
        Ok(self.inner.borrow().ttl)
    }

    fn set_unicast_hops_v6(&self, hops: u8) -> io::Result<()> {
        self.inner.borrow_mut().ttl = hops;
        Ok(())
    }

    fn send_to(&self, buf: &[u8], _addr: SocketAddr) -> io::Result<usize> {
        let mut inner = self.inner.borrow_mut();
        let response = match &inner.script {
            Script::PerTtl(hops) => hops
                .get(usize::from(inner.ttl).saturating_sub(1))
                .copied()
                .unwrap_or(SimResponse::Silent),
            Script::PerProbe(probes, fallback) => {
                probes.get(inner.sends).copied().unwrap_or(*fallback)
            }
        };
        inner.sends += 1;
        match response {
            SimResponse::SendError => {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied))
            }
            SimResponse::Silent => {}
            SimResponse::EchoReply(addr) => {
                let datagram = build_echo_reply(buf);
                inner.rx.push_back((datagram, sock(addr)));
            }
            SimResponse::TimeExceeded(router) => {
                let datagram = build_error(buf, router, IcmpType::TimeExceeded, 0, false);
                inner.rx.push_back((datagram, sock(router)));
            }
            SimResponse::ForeignTimeExceeded(router) => {
                let datagram = build_error(buf, router, IcmpType::TimeExceeded, 0, true);
                inner.rx.push_back((datagram, sock(router)));
            }
            SimResponse::Unreachable(router, code) => {
                let datagram =
                    build_error(buf, router, IcmpType::DestinationUnreachable, code, false);
                inner.rx.push_back((datagram, sock(router)));
            }
            SimResponse::Garbage(addr) => {
                inner.rx.push_back((vec![0xff, 0x00, 0xff], sock(addr)));
            }
        }
        Ok(buf.len())
    }

    fn is_readable(&self, timeout: Duration) -> io::Result<bool> {
        if self.inner.borrow().rx.is_empty() {
            thread::sleep(timeout);
        }
        Ok(!self.inner.borrow().rx.is_empty())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Option<SocketAddr>)> {
        match self.inner.borrow_mut().rx.pop_front() {
            Some((datagram, from)) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok((len, Some(from)))
            }
            None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }
}

fn sock(addr: Ipv4Addr) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(addr), 0)
}

/// Echo the probe back with the reply type, as a bare ICMP datagram.
fn build_echo_reply(probe: &[u8]) -> Vec<u8> {
    let mut reply = probe.to_vec();
    reply[0] = IcmpType::EchoReply.id();
    reply
}

/// Build an ICMP error carrying the original datagram, behind an outer
/// IPv4 header as a raw socket would deliver it.
fn build_error(
    probe: &[u8],
    router: Ipv4Addr,
    icmp_type: IcmpType,
    code: u8,
    corrupt_identifier: bool,
) -> Vec<u8> {
    // The original datagram as it left this host.
    let mut original = vec![0_u8; Ipv4Packet::minimum_packet_size() + probe.len()];
    {
        let mut ip4 = Ipv4Packet::new(&mut original).unwrap();
        ip4.set_version(4);
        ip4.set_header_length(5);
        ip4.set_protocol(IpProtocol::Icmp);
        ip4.set_ttl(1);
        ip4.set_payload(probe);
    }
    if corrupt_identifier {
        let offset = Ipv4Packet::minimum_packet_size() + 4;
        original[offset] ^= 0x55;
        original[offset + 1] ^= 0x55;
    }
    let mut icmp = vec![0_u8; ErrorPacket::minimum_packet_size() + original.len()];
    {
        let mut packet = ErrorPacket::new(&mut icmp).unwrap();
        packet.set_icmp_type(icmp_type);
        packet.set_icmp_code(IcmpCode(code));
        packet.set_payload(&original);
    }
    let mut outer = vec![0_u8; Ipv4Packet::minimum_packet_size() + icmp.len()];
    {
        let mut ip4 = Ipv4Packet::new(&mut outer).unwrap();
        ip4.set_version(4);
        ip4.set_header_length(5);
        ip4.set_protocol(IpProtocol::Icmp);
        ip4.set_ttl(64);
        ip4.set_source(router);
        ip4.set_payload(&icmp);
    }
    outer
}

/// A resolver which always returns the given address.
#[derive(Debug, Clone, Copy)]
pub struct FixedResolver(pub IpAddr);

impl Resolver for FixedResolver {
    fn resolve(&self, _hostname: &str, _style: AddressStyle) -> TraceResult<Vec<SocketAddr>> {
        Ok(vec![SocketAddr::new(self.0, 0)])
    }
}

/// Everything the observers saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Started(IpAddr),
    Failed(String),
    ProbeSent(u16),
    Response(u8),
    HopTimeout(u8),
    Hop {
        hop: u8,
        router: Option<IpAddr>,
        is_destination: bool,
        is_timeout: bool,
    },
    Finished {
        actual_hops: u8,
        reached_target: bool,
    },
    Reply(u16),
    Timeout(u16),
    Unexpected(String),
}

/// A thread-safe event recorder usable as both observer kinds.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    #[allow(dead_code)]
    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }
}

impl Observer for Recorder {
    fn on_started(&mut self, target: IpAddr) {
        self.push(Event::Started(target));
    }

    fn on_failed(&mut self, error: &TraceError) {
        self.push(Event::Failed(error.to_string()));
    }

    fn on_probe_sent(&mut self, _hop: u8, sequence: Sequence) {
        self.push(Event::ProbeSent(sequence.0));
    }

    fn on_response(&mut self, hop: u8, _rtt: Duration) {
        self.push(Event::Response(hop));
    }

    fn on_hop_timeout(&mut self, hop: u8) {
        self.push(Event::HopTimeout(hop));
    }

    fn on_hop_completed(&mut self, result: &HopResult) {
        self.push(Event::Hop {
            hop: result.hop_number,
            router: result.router,
            is_destination: result.is_destination,
            is_timeout: result.is_timeout,
        });
    }

    fn on_finished(&mut self, result: &hoptrace::SessionResult) {
        self.push(Event::Finished {
            actual_hops: result.actual_hops,
            reached_target: result.reached_target,
        });
    }
}

impl PingObserver for Recorder {
    fn on_started(&mut self, target: IpAddr) {
        self.push(Event::Started(target));
    }

    fn on_failed(&mut self, error: &TraceError) {
        self.push(Event::Failed(error.to_string()));
    }

    fn on_probe_sent(&mut self, sequence: Sequence) {
        self.push(Event::ProbeSent(sequence.0));
    }

    fn on_reply(&mut self, sequence: Sequence, _rtt: Duration) {
        self.push(Event::Reply(sequence.0));
    }

    fn on_timeout(&mut self, sequence: Sequence) {
        self.push(Event::Timeout(sequence.0));
    }

    fn on_unexpected(&mut self, description: &str) {
        self.push(Event::Unexpected(description.to_string()));
    }
}
