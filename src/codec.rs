use crate::config::{AddrFamily, PrivilegeMode};
use crate::error::TraceResult;
use crate::packet::checksum::icmp_ipv4_checksum;
use crate::packet::icmpv4::{EchoPacket, ErrorPacket, IcmpCode, IcmpPacket, IcmpType};
use crate::packet::icmpv6::{
    EchoPacket as EchoPacketV6, ErrorPacket as ErrorPacketV6, Icmpv6Code, Icmpv6Packet, Icmpv6Type,
};
use crate::packet::ipv4::Ipv4Packet;
use crate::packet::ipv6::Ipv6Packet;
use crate::probe::Classification;
use crate::types::{ProbeIndex, Sequence, TimeToLive, TraceId};
use std::time::{SystemTime, UNIX_EPOCH};

/// The size of the payload carried by every probe.
pub const PROBE_PAYLOAD_SIZE: usize = 16;

/// The ICMP header size shared by every message this engine handles.
const ICMP_HEADER_SIZE: usize = 8;

/// Builds Echo Requests and classifies inbound ICMP datagrams.
///
/// Classification filters on the session identifier: responses provoked by
/// another process degrade to [`Classification::Other`].  On an unprivileged
/// datagram socket the kernel rewrites the Echo identifier and so the filter
/// is disabled in that mode.
#[derive(Debug, Clone, Copy)]
pub struct IcmpCodec {
    identifier: TraceId,
    filter_identifier: bool,
}

impl IcmpCodec {
    #[must_use]
    pub const fn new(identifier: TraceId, privilege_mode: PrivilegeMode) -> Self {
        Self {
            identifier,
            filter_identifier: !privilege_mode.is_unprivileged(),
        }
    }

    #[must_use]
    pub const fn identifier(&self) -> TraceId {
        self.identifier
    }

    /// Build an `EchoRequest` datagram for the given family.
    ///
    /// For IPv4 the internet checksum is computed over the header and
    /// payload; for IPv6 the checksum field is left zero as the kernel
    /// computes it over the pseudo header.
    pub fn build_echo(
        &self,
        family: AddrFamily,
        sequence: Sequence,
        payload: &[u8],
    ) -> TraceResult<Vec<u8>> {
        let mut bytes = vec![0_u8; ICMP_HEADER_SIZE + payload.len()];
        match family {
            AddrFamily::Ipv4 => {
                let mut echo = EchoPacket::new(&mut bytes)?;
                echo.set_icmp_type(IcmpType::EchoRequest);
                echo.set_icmp_code(IcmpCode(0));
                echo.set_identifier(self.identifier.0);
                echo.set_sequence(sequence.0);
                echo.set_payload(payload);
                echo.set_checksum(icmp_ipv4_checksum(echo.packet()));
            }
            AddrFamily::Ipv6 => {
                let mut echo = EchoPacketV6::new(&mut bytes)?;
                echo.set_icmp_type(Icmpv6Type::EchoRequest);
                echo.set_icmp_code(Icmpv6Code(0));
                echo.set_identifier(self.identifier.0);
                echo.set_sequence(sequence.0);
                echo.set_payload(payload);
            }
        }
        Ok(bytes)
    }

    /// Classify an inbound datagram.
    #[must_use]
    pub fn classify(&self, family: AddrFamily, datagram: &[u8]) -> Classification {
        match family {
            AddrFamily::Ipv4 => self.classify_ipv4(datagram),
            AddrFamily::Ipv6 => self.classify_ipv6(datagram),
        }
    }

    /// Classify an IPv4 datagram which may or may not carry an IP header.
    ///
    /// A raw ICMP socket delivers the full IP datagram; a datagram ICMP
    /// socket delivers the bare ICMP message.  The two are told apart by
    /// the leading version nibble.
    fn classify_ipv4(&self, datagram: &[u8]) -> Classification {
        let icmp_bytes = strip_ipv4_header(datagram);
        let Ok(icmp) = IcmpPacket::new_view(icmp_bytes) else {
            return Classification::Malformed;
        };
        match icmp.get_icmp_type() {
            IcmpType::EchoReply => {
                let Ok(echo) = EchoPacket::new_view(icmp_bytes) else {
                    return Classification::Malformed;
                };
                let identifier = echo.get_identifier();
                let sequence = echo.get_sequence();
                if self.matches_identifier(identifier) {
                    Classification::EchoReply {
                        identifier,
                        sequence,
                    }
                } else {
                    Classification::Other
                }
            }
            IcmpType::TimeExceeded => {
                let Ok(packet) = ErrorPacket::new_view(icmp_bytes) else {
                    return Classification::Malformed;
                };
                let code = packet.get_icmp_code().0;
                match extract_inner_echo_ipv4(packet.payload()) {
                    Some((identifier, sequence)) if self.matches_identifier(identifier) => {
                        Classification::TimeExceeded {
                            identifier,
                            sequence,
                            code,
                        }
                    }
                    Some(_) => Classification::Other,
                    None => Classification::Malformed,
                }
            }
            IcmpType::DestinationUnreachable => {
                let Ok(packet) = ErrorPacket::new_view(icmp_bytes) else {
                    return Classification::Malformed;
                };
                let code = packet.get_icmp_code().0;
                match extract_inner_echo_ipv4(packet.payload()) {
                    Some((identifier, sequence)) if self.matches_identifier(identifier) => {
                        Classification::Unreachable {
                            identifier,
                            sequence,
                            code,
                        }
                    }
                    Some(_) => Classification::Other,
                    None => Classification::Malformed,
                }
            }
            IcmpType::EchoRequest | IcmpType::Other(_) => Classification::Other,
        }
    }

    /// Classify an IPv6 datagram, which is always a bare ICMPv6 message.
    fn classify_ipv6(&self, datagram: &[u8]) -> Classification {
        let Ok(icmp) = Icmpv6Packet::new_view(datagram) else {
            return Classification::Malformed;
        };
        match icmp.get_icmp_type() {
            Icmpv6Type::EchoReply => {
                let Ok(echo) = EchoPacketV6::new_view(datagram) else {
                    return Classification::Malformed;
                };
                let identifier = echo.get_identifier();
                let sequence = echo.get_sequence();
                if self.matches_identifier(identifier) {
                    Classification::EchoReply {
                        identifier,
                        sequence,
                    }
                } else {
                    Classification::Other
                }
            }
            Icmpv6Type::TimeExceeded => {
                let Ok(packet) = ErrorPacketV6::new_view(datagram) else {
                    return Classification::Malformed;
                };
                let code = packet.get_icmp_code().0;
                match extract_inner_echo_ipv6(packet.payload()) {
                    Some((identifier, sequence)) if self.matches_identifier(identifier) => {
                        Classification::TimeExceeded {
                            identifier,
                            sequence,
                            code,
                        }
                    }
                    Some(_) => Classification::Other,
                    None => Classification::Malformed,
                }
            }
            Icmpv6Type::DestinationUnreachable => {
                let Ok(packet) = ErrorPacketV6::new_view(datagram) else {
                    return Classification::Malformed;
                };
                let code = packet.get_icmp_code().0;
                match extract_inner_echo_ipv6(packet.payload()) {
                    Some((identifier, sequence)) if self.matches_identifier(identifier) => {
                        Classification::Unreachable {
                            identifier,
                            sequence,
                            code,
                        }
                    }
                    Some(_) => Classification::Other,
                    None => Classification::Malformed,
                }
            }
            Icmpv6Type::EchoRequest | Icmpv6Type::Other(_) => Classification::Other,
        }
    }

    const fn matches_identifier(&self, identifier: u16) -> bool {
        !self.filter_identifier || identifier == self.identifier.0
    }
}

/// Build the fixed-layout probe payload.
///
/// The layout is the send timestamp as `f64` seconds since the Unix epoch in
/// big-endian, followed by the hop and probe index, zero padded to
/// [`PROBE_PAYLOAD_SIZE`] bytes.
#[must_use]
pub fn probe_payload(hop: TimeToLive, probe_index: ProbeIndex) -> [u8; PROBE_PAYLOAD_SIZE] {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    let mut payload = [0_u8; PROBE_PAYLOAD_SIZE];
    payload[0..8].copy_from_slice(&timestamp.to_be_bytes());
    payload[8] = hop.0;
    payload[9] = probe_index.0;
    payload
}

/// Decode a probe payload built by [`probe_payload`].
#[must_use]
pub fn decode_probe_payload(payload: &[u8]) -> Option<(f64, TimeToLive, ProbeIndex)> {
    if payload.len() < 10 {
        return None;
    }
    let mut timestamp = [0_u8; 8];
    timestamp.copy_from_slice(&payload[0..8]);
    Some((
        f64::from_be_bytes(timestamp),
        TimeToLive(payload[8]),
        ProbeIndex(payload[9]),
    ))
}

/// Describe an inbound datagram for diagnostics.
///
/// Best-effort: returns `None` when the datagram cannot be interpreted at
/// all.  Used to surface unexpected packets as human readable events.
#[must_use]
pub fn describe(family: AddrFamily, datagram: &[u8]) -> Option<String> {
    match family {
        AddrFamily::Ipv4 => {
            let icmp = IcmpPacket::new_view(strip_ipv4_header(datagram)).ok()?;
            let code = icmp.get_icmp_code().0;
            Some(match icmp.get_icmp_type() {
                IcmpType::EchoRequest => "Echo Request".to_string(),
                IcmpType::EchoReply => "Echo Reply".to_string(),
                IcmpType::TimeExceeded => match code {
                    0 => "Time Exceeded (TTL exceeded in transit)".to_string(),
                    1 => "Time Exceeded (fragment reassembly time exceeded)".to_string(),
                    _ => format!("Time Exceeded (code {code})"),
                },
                IcmpType::DestinationUnreachable => match code {
                    0 => "Destination Network Unreachable".to_string(),
                    1 => "Destination Host Unreachable".to_string(),
                    2 => "Destination Protocol Unreachable".to_string(),
                    3 => "Destination Port Unreachable".to_string(),
                    _ => format!("Destination Unreachable (code {code})"),
                },
                IcmpType::Other(id) => format!("ICMP type {id} code {code}"),
            })
        }
        AddrFamily::Ipv6 => {
            let icmp = Icmpv6Packet::new_view(datagram).ok()?;
            let code = icmp.get_icmp_code().0;
            Some(match icmp.get_icmp_type() {
                Icmpv6Type::EchoRequest => "Echo Request".to_string(),
                Icmpv6Type::EchoReply => "Echo Reply".to_string(),
                Icmpv6Type::TimeExceeded => match code {
                    0 => "Time Exceeded (hop limit exceeded in transit)".to_string(),
                    1 => "Time Exceeded (fragment reassembly time exceeded)".to_string(),
                    _ => format!("Time Exceeded (code {code})"),
                },
                Icmpv6Type::DestinationUnreachable => match code {
                    0 => "Destination Unreachable (no route)".to_string(),
                    1 => "Destination Unreachable (administratively prohibited)".to_string(),
                    3 => "Destination Address Unreachable".to_string(),
                    4 => "Destination Port Unreachable".to_string(),
                    _ => format!("Destination Unreachable (code {code})"),
                },
                Icmpv6Type::Other(id) => format!("ICMPv6 type {id} code {code}"),
            })
        }
    }
}

/// Locate the ICMP message within an inbound IPv4 datagram.
///
/// If the datagram begins with an IPv4 header (version nibble 4 and at
/// least a minimal header present) the header is skipped; otherwise the
/// datagram is taken to be bare ICMP.
fn strip_ipv4_header(datagram: &[u8]) -> &[u8] {
    if datagram.len() >= Ipv4Packet::minimum_packet_size() && datagram[0] >> 4 == 4 {
        let header_len = usize::from(datagram[0] & 0x0f) * 4;
        if header_len >= Ipv4Packet::minimum_packet_size() {
            return datagram.get(header_len..).unwrap_or_default();
        }
    }
    datagram
}

/// Extract the identifier and sequence of the original `EchoRequest` from
/// the payload of an IPv4 error message.
///
/// The payload is the original IP datagram: an IPv4 header of `IHL * 4`
/// bytes followed by at least the 8 byte ICMP header.
fn extract_inner_echo_ipv4(payload: &[u8]) -> Option<(u16, u16)> {
    let ip4 = Ipv4Packet::new_view(payload).ok()?;
    let header_len = usize::from(ip4.get_header_length()) * 4;
    if header_len < Ipv4Packet::minimum_packet_size() || payload.len() < header_len {
        return None;
    }
    let nested_echo = EchoPacket::new_view(&payload[header_len..]).ok()?;
    Some((nested_echo.get_identifier(), nested_echo.get_sequence()))
}

/// Extract the identifier and sequence of the original `EchoRequest` from
/// the payload of an IPv6 error message.
///
/// The payload is the original IP datagram: the fixed 40 byte IPv6 header
/// followed by at least the 8 byte ICMPv6 header.
fn extract_inner_echo_ipv6(payload: &[u8]) -> Option<(u16, u16)> {
    let ip6 = Ipv6Packet::new_view(payload).ok()?;
    let nested_echo = EchoPacketV6::new_view(ip6.payload()).ok()?;
    Some((nested_echo.get_identifier(), nested_echo.get_sequence()))
}
