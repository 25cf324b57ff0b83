use crate::packet::bytes::Bytes;
use crate::packet::error::{PacketError, PacketResult};
use crate::packet::IpProtocol;
use std::fmt::{Debug, Formatter};
use std::net::Ipv6Addr;

const VERSION_OFFSET: usize = 0;
const NEXT_HEADER_OFFSET: usize = 6;
const HOP_LIMIT_OFFSET: usize = 7;
const SOURCE_OFFSET: usize = 8;
const DESTINATION_OFFSET: usize = 24;

const HEADER_SIZE: usize = 40;

/// An `IPv6` packet.
///
/// The fixed 40 byte header only; extension headers are not interpreted.
pub struct Ipv6Packet<'a> {
    bytes: Bytes<'a>,
}

impl<'a> Ipv6Packet<'a> {
    pub fn new(packet: &'a mut [u8]) -> PacketResult<Ipv6Packet<'a>> {
        check_len(packet.len())?;
        Ok(Self {
            bytes: Bytes::Mut(packet),
        })
    }

    pub fn new_view(packet: &'a [u8]) -> PacketResult<Ipv6Packet<'a>> {
        check_len(packet.len())?;
        Ok(Self {
            bytes: Bytes::View(packet),
        })
    }

    #[must_use]
    pub const fn minimum_packet_size() -> usize {
        HEADER_SIZE
    }

    #[must_use]
    pub fn get_version(&self) -> u8 {
        self.bytes.read_u8(VERSION_OFFSET) >> 4
    }

    #[must_use]
    pub fn get_next_header(&self) -> IpProtocol {
        IpProtocol::from(self.bytes.read_u8(NEXT_HEADER_OFFSET))
    }

    #[must_use]
    pub fn get_hop_limit(&self) -> u8 {
        self.bytes.read_u8(HOP_LIMIT_OFFSET)
    }

    #[must_use]
    pub fn get_source(&self) -> Ipv6Addr {
        let mut octets = [0_u8; 16];
        octets.copy_from_slice(&self.bytes.as_slice()[SOURCE_OFFSET..SOURCE_OFFSET + 16]);
        Ipv6Addr::from(octets)
    }

    #[must_use]
    pub fn get_destination(&self) -> Ipv6Addr {
        let mut octets = [0_u8; 16];
        octets
            .copy_from_slice(&self.bytes.as_slice()[DESTINATION_OFFSET..DESTINATION_OFFSET + 16]);
        Ipv6Addr::from(octets)
    }

    pub fn set_version(&mut self, val: u8) {
        let nibbles = (self.bytes.read_u8(VERSION_OFFSET) & 0x0f) | ((val & 0x0f) << 4);
        self.bytes.set_u8(VERSION_OFFSET, nibbles);
    }

    pub fn set_next_header(&mut self, val: IpProtocol) {
        self.bytes.set_u8(NEXT_HEADER_OFFSET, val.id());
    }

    pub fn set_hop_limit(&mut self, val: u8) {
        self.bytes.set_u8(HOP_LIMIT_OFFSET, val);
    }

    pub fn set_source(&mut self, val: Ipv6Addr) {
        self.bytes.copy_into(SOURCE_OFFSET, &val.octets());
    }

    pub fn set_destination(&mut self, val: Ipv6Addr) {
        self.bytes.copy_into(DESTINATION_OFFSET, &val.octets());
    }

    pub fn set_payload(&mut self, vals: &[u8]) {
        self.bytes.copy_into(HEADER_SIZE, vals);
    }

    #[must_use]
    pub fn packet(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    /// The bytes which follow the fixed header.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.bytes.as_slice()[HEADER_SIZE..]
    }
}

impl Debug for Ipv6Packet<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ipv6Packet")
            .field("version", &self.get_version())
            .field("next_header", &self.get_next_header())
            .field("hop_limit", &self.get_hop_limit())
            .field("source", &self.get_source())
            .field("destination", &self.get_destination())
            .finish()
    }
}

fn check_len(provided: usize) -> PacketResult<()> {
    if provided >= HEADER_SIZE {
        Ok(())
    } else {
        Err(PacketError::BufferTooSmall {
            kind: "Ipv6Packet",
            minimum: HEADER_SIZE,
            provided,
        })
    }
}
