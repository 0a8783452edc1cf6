//! The protocol compatibility gate: an MD5 digest over the ordered table of
//! per-packet-type version bytes. The server computes the same digest over
//! its own table and compares verbatim; a mismatch means the connect request
//! is silently ignored in most server configurations.
//!
//! The table is serialized as raw bytes (count, then one version byte per
//! type slot in enumerant order) with no length prefixes. Adding or removing
//! a type slot, or bumping any per-type version, changes the digest and
//! breaks interoperability with servers expecting the old value - that
//! coupling is the entire point of the mechanism.

use md5::{Digest, Md5};

use crate::packet::PacketType;

/// Version carried by type slots whose format never diverged from the
/// baseline.
pub const DEFAULT_PACKET_VERSION: u8 = 22;

/// One past the highest known enumerant; the table covers every slot below
/// this, including gaps.
pub const NUM_PACKET_TYPES: u8 = 0x46;

/// Per-type version byte, also used as the header version when framing a
/// packet of that type.
pub fn version_for_packet_type(packet_type: PacketType) -> u8 {
    match packet_type {
        PacketType::Ping | PacketType::PingReply => 18,
        PacketType::DomainList
        | PacketType::DomainListRequest
        | PacketType::DomainConnectRequest => 25,
        PacketType::DomainConnectionDenied | PacketType::DomainSettings => 18,
        PacketType::IcePing | PacketType::IcePingReply => 18,
        PacketType::EntityAdd
        | PacketType::EntityEdit
        | PacketType::EntityErase
        | PacketType::EntityData => 68,
        _ => DEFAULT_PACKET_VERSION,
    }
}

/// The full table, one byte per slot from 0 up to [`NUM_PACKET_TYPES`].
pub fn version_table() -> Vec<u8> {
    (0..NUM_PACKET_TYPES)
        .map(|raw| {
            PacketType::try_from(raw)
                .map(version_for_packet_type)
                .unwrap_or(DEFAULT_PACKET_VERSION)
        })
        .collect()
}

pub fn compute_signature() -> [u8; 16] {
    signature_of(&version_table())
}

pub fn signature_of(versions: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update([versions.len() as u8]);
    hasher.update(versions);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_deterministic() {
        assert_eq!(compute_signature(), compute_signature());
    }

    #[test]
    fn test_signature_is_sensitive_to_single_entries() {
        let baseline = version_table();
        let reference = signature_of(&baseline);

        for i in 0..baseline.len() {
            let mut edited = baseline.clone();
            edited[i] = edited[i].wrapping_add(1);
            assert_ne!(
                signature_of(&edited),
                reference,
                "editing slot {} must change the digest",
                i
            );
        }
    }

    #[test]
    fn test_signature_is_sensitive_to_table_length() {
        let mut table = version_table();
        table.push(DEFAULT_PACKET_VERSION);
        assert_ne!(signature_of(&table), compute_signature());
    }

    #[test]
    fn test_table_covers_every_slot() {
        let table = version_table();
        assert_eq!(table.len(), NUM_PACKET_TYPES as usize);
        assert_eq!(table[PacketType::DomainConnectRequest as usize], 25);
        assert_eq!(table[PacketType::EntityData as usize], 68);
        assert_eq!(table[PacketType::Unknown as usize], DEFAULT_PACKET_VERSION);
    }
}
