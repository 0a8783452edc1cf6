//! Parser for the service directory embedded in a domain list reply: the
//! variable-length tail of assignment client records advertising the
//! specialised services behind the domain.

use std::net::SocketAddr;

use bytes::Buf;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing::{debug, warn};
use uuid::Uuid;

use protocol::stream::{try_get_socket_addr, try_get_u16, try_get_u32, try_get_u8, try_get_uuid};
use protocol::WireError;

/// Service type tags as the server advertises them.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ServiceType {
    DomainServer = b'D',
    EntityServer = b'o',
    Agent = b'I',
    AudioMixer = b'M',
    AvatarMixer = b'W',
    AssetServer = b'A',
    MessagesMixer = b'm',
    EntityScriptServer = b'S',
}

/// One advertised service endpoint. Rebuilt in full on every list reply,
/// never merged incrementally.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct AssignmentClientRecord {
    pub service_type: ServiceType,
    pub uuid: Uuid,
    pub public_address: SocketAddr,
    pub permissions: u32,
    pub is_replicated: bool,
    pub local_id: u16,
    pub connection_secret: Uuid,
}

/// Reads records until the buffer runs out. Truncation mid-record keeps the
/// records parsed so far; an unsupported address family abandons the rest of
/// the list (the record layout after an unknown address shape is
/// unknowable). Neither condition fails the surrounding reply.
pub fn parse_directory(buf: &mut impl Buf) -> Vec<AssignmentClientRecord> {
    let mut records = Vec::new();
    while buf.has_remaining() {
        match parse_record(buf) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(WireError::UnsupportedAddressFamily(family)) => {
                warn!(
                    "assignment record with unsupported address family {}, ignoring the remainder of the directory",
                    family
                );
                break;
            }
            Err(e) => {
                debug!(
                    "directory truncated mid-record ({}), keeping {} complete record(s)",
                    e,
                    records.len()
                );
                break;
            }
        }
    }
    records
}

/// `Ok(None)` means the record was structurally complete but carried an
/// unknown service tag; it is consumed and skipped.
fn parse_record(buf: &mut impl Buf) -> Result<Option<AssignmentClientRecord>, WireError> {
    let raw_tag = try_get_u8(buf, "service type tag")?;
    let uuid = try_get_uuid(buf)?;

    let _public_socket_type = try_get_u8(buf, "public socket type tag")?;
    let public_address = try_get_socket_addr(buf)?;

    // the local socket is consumed but not retained - only the public
    // endpoint is ever used for outbound traffic
    let _local_socket_type = try_get_u8(buf, "local socket type tag")?;
    let _local_address = try_get_socket_addr(buf)?;

    let permissions = try_get_u32(buf, "permission bits")?;
    let is_replicated = try_get_u8(buf, "replicated flag")? != 0;
    let local_id = try_get_u16(buf, "assignment local id")?;
    let connection_secret = try_get_uuid(buf)?;

    let Ok(service_type) = ServiceType::try_from(raw_tag) else {
        debug!("skipping assignment record with unknown service tag {:#04x}", raw_tag);
        return Ok(None);
    };

    Ok(Some(AssignmentClientRecord {
        service_type,
        uuid,
        public_address,
        permissions,
        is_replicated,
        local_id,
        connection_secret,
    }))
}

pub fn find_service(
    records: &[AssignmentClientRecord],
    service_type: ServiceType,
) -> Option<&AssignmentClientRecord> {
    records.iter().find(|r| r.service_type == service_type)
}

#[cfg(test)]
pub(crate) mod test_support {
    use bytes::{BufMut, BytesMut};
    use uuid::Uuid;

    use protocol::stream::put_uuid;

    /// Serializes one assignment record the way the server does.
    pub fn put_record(buf: &mut BytesMut, tag: u8, addr: [u8; 4], port: u16) {
        buf.put_u8(tag);
        put_uuid(buf, &Uuid::new_v4());
        for _ in 0..2 {
            buf.put_u8(1); // socket type: UDP
            buf.put_u8(0); // address family: IPv4
            buf.put_slice(&addr);
            buf.put_u16(port);
        }
        buf.put_u32(0x0000_0040); // permission bits
        buf.put_u8(0); // not replicated
        buf.put_u16(17); // assignment's own local id
        put_uuid(buf, &Uuid::new_v4());
    }
}
