//! Payload construction and parsing for the domain handshake: the connect
//! request, the domain list reply, connection denials, and both ping
//! flavours. Framing (header, sequence numbers, sourced-ness) lives in
//! [`crate::session::Session`]; everything here is payload-only.

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, BytesMut};
use uuid::Uuid;

use protocol::stream::{
    compress_blob, put_byte_array, put_socket_addr, put_string, put_uuid, try_get_string,
    try_get_u16, try_get_u32, try_get_u64, try_get_u8, try_get_uuid,
};
use protocol::WireError;

use crate::credentials::Credentials;
use crate::directory::{parse_directory, AssignmentClientRecord, ServiceType};
use crate::session::Session;

/// Node type tag this client identifies as.
pub const OWNER_TYPE_AGENT: u8 = b'I';

/// Socket type tag, written outside the address structure.
pub const SOCKET_TYPE_UDP: u8 = 1;

/// Why a connect request is being sent; travels as a u32.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
#[repr(u32)]
pub enum ConnectReason {
    Connect = 0,
    SilentDomainDisconnect = 1,
    Awake = 2,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum PingLocality {
    Local = 0,
    Public = 1,
}

/// Services this client asks the domain to advertise.
pub const SERVICES_OF_INTEREST: [ServiceType; 4] = [
    ServiceType::EntityServer,
    ServiceType::AudioMixer,
    ServiceType::AvatarMixer,
    ServiceType::AssetServer,
];

pub fn unix_micros() -> u64 {
    // a clock before the epoch degrades to 0 rather than failing the send
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

fn system_description() -> Vec<u8> {
    serde_json::json!({
        "OS": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
    })
    .to_string()
    .into_bytes()
}

/// Builds the connect request payload. Field order is load-bearing: the
/// server reads positionally and silently drops anything that does not
/// match its own layout.
pub fn build_connect_request(
    session: &Session,
    public_addr: SocketAddr,
    local_addr: SocketAddr,
    reason: ConnectReason,
    previous_connection_uptime_usec: u64,
    credentials: &Credentials,
) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(256);

    put_uuid(&mut buf, &session.session_id);
    put_byte_array(&mut buf, session.protocol_signature());
    put_string(&mut buf, ""); // hardware identifier, unused
    put_uuid(&mut buf, &session.machine_fingerprint);
    put_byte_array(&mut buf, &compress_blob(&system_description()));
    buf.put_u32(reason as u32);
    buf.put_u64(previous_connection_uptime_usec);
    buf.put_u64(unix_micros());
    buf.put_u8(OWNER_TYPE_AGENT);

    buf.put_u8(SOCKET_TYPE_UDP);
    put_socket_addr(&mut buf, &public_addr);
    buf.put_u8(SOCKET_TYPE_UDP);
    put_socket_addr(&mut buf, &local_addr);

    buf.put_u32(SERVICES_OF_INTEREST.len() as u32);
    for service in SERVICES_OF_INTEREST {
        buf.put_u8(service.into());
    }

    put_string(&mut buf, ""); // place name

    put_string(&mut buf, &credentials.username);
    put_byte_array(&mut buf, &credentials.username_signature);
    put_string(&mut buf, &credentials.domain_username);
    put_string(&mut buf, &credentials.domain_access_token);

    buf.to_vec()
}

/// The parsed body of a domain list reply: session/domain identity, the
/// assigned local id, and the embedded service directory.
#[derive(Clone, Debug)]
pub struct DomainListReply {
    pub domain_id: Uuid,
    pub domain_local_id: u16,
    pub session_id: Uuid,
    pub local_id: u16,
    pub permissions: u32,
    pub authenticated: bool,
    pub connect_request_timestamp_usec: u64,
    pub reply_send_time_usec: u64,
    pub directory: Vec<AssignmentClientRecord>,
}

impl DomainListReply {
    pub fn parse(payload: &[u8]) -> Result<DomainListReply, WireError> {
        let mut buf = payload;

        let domain_id = try_get_uuid(&mut buf)?;
        let domain_local_id = try_get_u16(&mut buf, "domain local id")?;
        let session_id = try_get_uuid(&mut buf)?;
        let local_id = try_get_u16(&mut buf, "assigned local id")?;
        let permissions = try_get_u32(&mut buf, "permission bits")?;
        let authenticated = try_get_u8(&mut buf, "authenticated flag")? != 0;
        let connect_request_timestamp_usec = try_get_u64(&mut buf, "connect request timestamp")?;
        let reply_send_time_usec = try_get_u64(&mut buf, "reply send time")?;

        let directory = parse_directory(&mut buf);

        Ok(DomainListReply {
            domain_id,
            domain_local_id,
            session_id,
            local_id,
            permissions,
            authenticated,
            connect_request_timestamp_usec,
            reply_send_time_usec,
            directory,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConnectionDenial {
    pub reason_code: u8,
    pub reason: Option<String>,
}

/// Denials are best-effort: a bare packet still means "denied", so parsing
/// never fails - missing fields just come back empty.
pub fn parse_connection_denied(payload: &[u8]) -> ConnectionDenial {
    let mut buf = payload;
    let reason_code = try_get_u8(&mut buf, "denial reason code").unwrap_or(0);
    let reason = try_get_string(&mut buf).ok().filter(|s| !s.is_empty());
    ConnectionDenial { reason_code, reason }
}

/// Liveness ping payload: microsecond timestamp plus a locality tag.
pub fn build_ping(locality: PingLocality, timestamp_usec: u64) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(9);
    buf.put_u64(timestamp_usec);
    buf.put_u8(locality as u8);
    buf.to_vec()
}

/// NAT-traversal ping: an opaque peer identifier and a subtype byte, both
/// echoed verbatim in the reply.
pub fn parse_ice_ping(payload: &[u8]) -> Result<(Uuid, u8), WireError> {
    let mut buf = payload;
    let peer_id = try_get_uuid(&mut buf)?;
    let subtype = try_get_u8(&mut buf, "ice ping subtype")?;
    Ok((peer_id, subtype))
}

pub fn build_ice_ping_reply(peer_id: &Uuid, subtype: u8) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(17);
    put_uuid(&mut buf, peer_id);
    buf.put_u8(subtype);
    buf.to_vec()
}


#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use protocol::packet::{is_sourced, peek_type, PacketHeader, PacketType};
    use protocol::stream::uuid_from_text;

    use crate::directory::test_support::put_record;

    use super::test_support::put_list_reply_prelude;
    use super::*;

    fn fixed_session() -> Session {
        let mut session = Session::new();
        session.session_id = uuid_from_text("01234567-89ab-cdef-0123-456789abcdef").unwrap();
        session
    }

    #[test]
    fn test_connect_request_starts_with_session_uuid_and_signature() {
        let session = fixed_session();
        let addr: SocketAddr = "127.0.0.1:53000".parse().unwrap();
        let payload = build_connect_request(
            &session,
            addr,
            addr,
            ConnectReason::Connect,
            0,
            &Credentials::default(),
        );

        assert_eq!(
            &payload[..16],
            &[
                0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89,
                0xab, 0xcd, 0xef
            ]
        );
        assert_eq!(&payload[16..20], &[0, 0, 0, 16]);
        assert_eq!(&payload[20..36], session.protocol_signature());
    }

    /// A freshly built connect request datagram decodes back to a
    /// non-sourced header with sequence 0.
    #[test]
    fn test_connect_request_datagram_round_trip() {
        let mut session = fixed_session();
        let addr: SocketAddr = "127.0.0.1:53000".parse().unwrap();

        let payload = build_connect_request(
            &session,
            addr,
            addr,
            ConnectReason::Connect,
            0,
            &Credentials::default(),
        );
        let datagram = session
            .frame_packet(PacketType::DomainConnectRequest, &payload)
            .unwrap();

        assert_eq!(peek_type(&datagram), Some(PacketType::DomainConnectRequest));
        assert!(!is_sourced(PacketType::DomainConnectRequest));

        let mut buf: &[u8] = &datagram;
        let header = PacketHeader::deser(&mut buf, false).unwrap();
        assert_eq!(header.packet_type, PacketType::DomainConnectRequest);
        assert_eq!(header.sequence_number, 0);
        assert_eq!(header.source_id, None);
        assert_eq!(buf, &payload[..]);
    }

    #[test]
    fn test_domain_list_reply_parse() {
        let mut buf = BytesMut::new();
        put_list_reply_prelude(&mut buf, 345);
        put_record(&mut buf, b'o', [127, 0, 0, 1], 40102);

        let reply = DomainListReply::parse(&buf).unwrap();
        assert_eq!(
            reply.domain_id,
            uuid_from_text("11111111-2222-3333-4444-555555555555").unwrap()
        );
        assert_eq!(reply.local_id, 345);
        assert_eq!(reply.permissions, 0x42);
        assert!(reply.authenticated);
        assert_eq!(reply.connect_request_timestamp_usec, 1_000);
        assert_eq!(reply.reply_send_time_usec, 2_000);
        assert_eq!(reply.directory.len(), 1);
        assert_eq!(reply.directory[0].service_type, ServiceType::EntityServer);
    }

    #[test]
    fn test_domain_list_reply_without_directory() {
        let mut buf = BytesMut::new();
        put_list_reply_prelude(&mut buf, 1);

        let reply = DomainListReply::parse(&buf).unwrap();
        assert!(reply.directory.is_empty());
    }

    #[test]
    fn test_domain_list_reply_truncated_prelude() {
        let mut buf = BytesMut::new();
        put_list_reply_prelude(&mut buf, 1);
        assert!(DomainListReply::parse(&buf[..20]).is_err());
    }

    #[test]
    fn test_connection_denied_with_reason() {
        let mut buf = BytesMut::new();
        buf.put_u8(3);
        put_string(&mut buf, "domain is full");

        let denial = parse_connection_denied(&buf);
        assert_eq!(denial.reason_code, 3);
        assert_eq!(denial.reason.as_deref(), Some("domain is full"));
    }

    #[test]
    fn test_connection_denied_bare() {
        let denial = parse_connection_denied(&[]);
        assert_eq!(denial.reason_code, 0);
        assert!(denial.reason.is_none());
    }

    #[test]
    fn test_ping_payload_layout() {
        let payload = build_ping(PingLocality::Local, 0x0102_0304_0506_0708);
        assert_eq!(payload, vec![1, 2, 3, 4, 5, 6, 7, 8, 0]);
    }

    #[test]
    fn test_ice_ping_echo() {
        let peer = uuid_from_text("01234567-89ab-cdef-0123-456789abcdef").unwrap();
        let ping = build_ice_ping_reply(&peer, 2);
        let (echoed_peer, echoed_subtype) = parse_ice_ping(&ping).unwrap();
        assert_eq!(echoed_peer, peer);
        assert_eq!(echoed_subtype, 2);
    }
}
