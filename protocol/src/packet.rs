//! Packet header framing: 27-bit sequence number plus flag bits, type byte,
//! version byte, and the optional source id that only "sourced" types carry.

use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::stream::{try_get_u16, try_get_u32, try_get_u8};
use crate::WireError;

pub const CONTROL_BIT: u32 = 0x8000_0000;
pub const RELIABLE_BIT: u32 = 0x4000_0000;
pub const MESSAGE_BIT: u32 = 0x2000_0000;
pub const SEQUENCE_NUMBER_MASK: u32 = 0x07ff_ffff;

/// A local id of 0 means "not assigned yet".
pub const NULL_LOCAL_ID: u16 = 0;

pub const BASE_HEADER_SIZE: usize = 6;
pub const SOURCED_HEADER_SIZE: usize = 8;

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum PacketType {
    Unknown = 0,
    Ping = 1,
    PingReply = 2,
    DomainList = 3,
    DomainListRequest = 4,
    DomainConnectionDenied = 6,
    DomainServerRequireDtls = 7,
    DomainConnectRequest = 8,
    DomainServerPathQuery = 9,
    DomainServerPathResponse = 10,
    DomainServerAddedNode = 11,
    DomainServerConnectionToken = 12,
    DomainSettingsRequest = 13,
    DomainSettings = 14,
    IcePing = 32,
    IcePingReply = 33,
    EntityAdd = 0x41,
    EntityEdit = 0x42,
    EntityErase = 0x43,
    EntityQuery = 0x44,
    EntityData = 0x45,
}

/// Whether a packet type carries the server-assigned local id in its header.
///
/// Domain-level control traffic is exchanged before any id exists and is
/// never sourced; everything a node sends once admitted is. This is a static
/// property of the type - both framer and parser consult this table, since a
/// 6-byte and an 8-byte header cannot be told apart by length.
pub fn is_sourced(packet_type: PacketType) -> bool {
    !matches!(
        packet_type,
        PacketType::Unknown
            | PacketType::DomainList
            | PacketType::DomainListRequest
            | PacketType::DomainConnectionDenied
            | PacketType::DomainServerRequireDtls
            | PacketType::DomainConnectRequest
            | PacketType::DomainServerPathQuery
            | PacketType::DomainServerPathResponse
            | PacketType::DomainServerAddedNode
            | PacketType::DomainServerConnectionToken
            | PacketType::DomainSettingsRequest
            | PacketType::DomainSettings
            | PacketType::IcePing
            | PacketType::IcePingReply
    )
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct PacketHeader {
    pub sequence_number: u32,
    pub control: bool,
    pub reliable: bool,
    pub message: bool,
    pub packet_type: PacketType,
    pub version: u8,
    pub source_id: Option<u16>,
}

impl PacketHeader {
    pub fn len(&self) -> usize {
        if self.source_id.is_some() {
            SOURCED_HEADER_SIZE
        } else {
            BASE_HEADER_SIZE
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        let mut word = self.sequence_number & SEQUENCE_NUMBER_MASK;
        if self.control {
            word |= CONTROL_BIT;
        }
        if self.reliable {
            word |= RELIABLE_BIT;
        }
        if self.message {
            word |= MESSAGE_BIT;
        }
        buf.put_u32(word);
        buf.put_u8(self.packet_type.into());
        buf.put_u8(self.version);
        if let Some(source_id) = self.source_id {
            buf.put_u16(source_id);
        }
    }

    /// Callers must pass the expected sourced-ness for the packet type at
    /// hand (normally `is_sourced(peek_type(..))`) - it cannot be inferred
    /// from the buffer.
    pub fn deser(buf: &mut impl Buf, expect_sourced: bool) -> Result<PacketHeader, WireError> {
        let word = try_get_u32(buf, "sequence/flags word")?;
        let raw_type = try_get_u8(buf, "packet type")?;
        let version = try_get_u8(buf, "packet version")?;
        let source_id = if expect_sourced {
            Some(try_get_u16(buf, "source id")?)
        } else {
            None
        };

        Ok(PacketHeader {
            sequence_number: word & SEQUENCE_NUMBER_MASK,
            control: word & CONTROL_BIT != 0,
            reliable: word & RELIABLE_BIT != 0,
            message: word & MESSAGE_BIT != 0,
            packet_type: PacketType::try_from(raw_type).unwrap_or(PacketType::Unknown),
            version,
            source_id,
        })
    }
}

/// Reads the type byte of a framed datagram without consuming anything.
pub fn peek_type(data: &[u8]) -> Option<PacketType> {
    let raw = *data.get(4)?;
    Some(PacketType::try_from(raw).unwrap_or(PacketType::Unknown))
}
