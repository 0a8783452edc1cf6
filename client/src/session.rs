use std::net::SocketAddr;

use anyhow::bail;
use bytes::{BufMut, BytesMut};
use uuid::Uuid;

use protocol::packet::{is_sourced, PacketHeader, PacketType, NULL_LOCAL_ID, SEQUENCE_NUMBER_MASK};
use protocol::signature::{compute_signature, version_for_packet_type};

/// Lifecycle of one connection attempt against a domain server. There is no
/// terminal state: a silent server is detected by the liveness check and
/// drops the session back to `Disconnected` for a fresh handshake.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ConnectionState {
    Disconnected,
    AwaitingListReply,
    Connected { entity_service: Option<SocketAddr> },
}

/// All per-connection mutable state: identifiers, the server-assigned local
/// id, and the outbound sequence counter. One instance per connection
/// attempt, passed explicitly to whatever needs it - nothing here is global.
pub struct Session {
    pub session_id: Uuid,
    pub machine_fingerprint: Uuid,
    pub domain_id: Uuid,
    /// Assigned by the server in the list reply; 0 = unassigned.
    pub local_id: u16,
    pub permissions: u32,
    pub authenticated: bool,
    sequence_counter: u32,
    protocol_signature: [u8; 16],
}

impl Session {
    pub fn new() -> Session {
        Session {
            session_id: Uuid::new_v4(),
            machine_fingerprint: Uuid::new_v4(),
            domain_id: Uuid::nil(),
            local_id: NULL_LOCAL_ID,
            permissions: 0,
            authenticated: false,
            sequence_counter: 0,
            protocol_signature: compute_signature(),
        }
    }

    pub fn protocol_signature(&self) -> &[u8; 16] {
        &self.protocol_signature
    }

    pub fn has_local_id(&self) -> bool {
        self.local_id != NULL_LOCAL_ID
    }

    /// Increments on every outbound packet regardless of type, wrapping
    /// within 27 bits.
    pub fn next_sequence_number(&mut self) -> u32 {
        let n = self.sequence_counter;
        self.sequence_counter = (n + 1) & SEQUENCE_NUMBER_MASK;
        n
    }

    /// Frames `payload` into a complete datagram for `packet_type`.
    ///
    /// Sourced types require the server-assigned local id; asking for one
    /// before assignment is a precondition violation and fails, not a
    /// network error. Pings straddle the handshake: they go out non-sourced
    /// until an id is assigned and sourced from then on.
    pub fn frame_packet(
        &mut self,
        packet_type: PacketType,
        payload: &[u8],
    ) -> anyhow::Result<Vec<u8>> {
        let source_id = if !is_sourced(packet_type) {
            None
        } else if matches!(packet_type, PacketType::Ping | PacketType::PingReply) {
            self.has_local_id().then_some(self.local_id)
        } else if self.has_local_id() {
            Some(self.local_id)
        } else {
            bail!(
                "precondition violation: cannot frame sourced packet {:?} before a local id is assigned",
                packet_type
            );
        };

        let header = PacketHeader {
            sequence_number: self.next_sequence_number(),
            control: false,
            reliable: false,
            message: false,
            packet_type,
            version: version_for_packet_type(packet_type),
            source_id,
        };

        let mut buf = BytesMut::with_capacity(header.len() + payload.len());
        header.ser(&mut buf);
        buf.put_slice(payload);
        Ok(buf.to_vec())
    }

    /// Clears everything the server assigned, keeping the session and
    /// fingerprint identifiers stable across reconnect attempts.
    pub fn reset_assignment(&mut self) {
        self.domain_id = Uuid::nil();
        self.local_id = NULL_LOCAL_ID;
        self.permissions = 0;
        self.authenticated = false;
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_counter_wraps_at_27_bits() {
        let mut session = Session::new();
        session.sequence_counter = SEQUENCE_NUMBER_MASK;
        assert_eq!(session.next_sequence_number(), SEQUENCE_NUMBER_MASK);
        assert_eq!(session.next_sequence_number(), 0);
        assert_eq!(session.next_sequence_number(), 1);
    }

    #[test]
    fn test_sourced_frame_fails_fast_without_local_id() {
        let mut session = Session::new();
        assert!(session.frame_packet(PacketType::EntityQuery, &[0]).is_err());

        session.local_id = 42;
        let datagram = session.frame_packet(PacketType::EntityQuery, &[0]).unwrap();
        assert_eq!(datagram.len(), 8 + 1);
        assert_eq!(&datagram[6..8], &[0, 42]);
    }

    #[test]
    fn test_ping_framing_follows_id_assignment() {
        let mut session = Session::new();

        let before = session.frame_packet(PacketType::Ping, &[1, 2, 3]).unwrap();
        assert_eq!(before.len(), 6 + 3);

        session.local_id = 7;
        let after = session.frame_packet(PacketType::Ping, &[1, 2, 3]).unwrap();
        assert_eq!(after.len(), 8 + 3);
        assert_eq!(&after[6..8], &[0, 7]);
    }

    #[test]
    fn test_sequence_increments_across_packet_types() {
        let mut session = Session::new();
        let a = session.frame_packet(PacketType::DomainConnectRequest, &[]).unwrap();
        let b = session.frame_packet(PacketType::DomainListRequest, &[]).unwrap();
        let c = session.frame_packet(PacketType::Ping, &[]).unwrap();
        assert_eq!(a[3], 0);
        assert_eq!(b[3], 1);
        assert_eq!(c[3], 2);
    }

    #[test]
    fn test_reset_assignment_keeps_identity() {
        let mut session = Session::new();
        let id = session.session_id;
        session.local_id = 9;
        session.authenticated = true;

        session.reset_assignment();
        assert_eq!(session.session_id, id);
        assert!(!session.has_local_id());
        assert!(!session.authenticated);
    }
}
