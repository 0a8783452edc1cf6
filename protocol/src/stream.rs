//! Serialization primitives matching the domain server's Qt-flavoured wire
//! conventions. Everything is big-endian; every read checks bounds before
//! touching the buffer and fails with [`WireError::Truncated`] instead of
//! panicking.

use std::io::{Read, Write};
use std::net::{SocketAddr, SocketAddrV4};

use bytes::{Buf, BufMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use uuid::Uuid;

use crate::WireError;

/// Address family tags as the server serializes them.
pub const ADDRESS_FAMILY_IPV4: u8 = 0;
pub const ADDRESS_FAMILY_IPV6: u8 = 1;

fn ensure(buf: &impl Buf, needed: usize, what: &'static str) -> Result<(), WireError> {
    if buf.remaining() < needed {
        return Err(WireError::Truncated(what));
    }
    Ok(())
}

pub fn try_get_u8(buf: &mut impl Buf, what: &'static str) -> Result<u8, WireError> {
    ensure(buf, 1, what)?;
    Ok(buf.get_u8())
}

pub fn try_get_u16(buf: &mut impl Buf, what: &'static str) -> Result<u16, WireError> {
    ensure(buf, 2, what)?;
    Ok(buf.get_u16())
}

pub fn try_get_u32(buf: &mut impl Buf, what: &'static str) -> Result<u32, WireError> {
    ensure(buf, 4, what)?;
    Ok(buf.get_u32())
}

pub fn try_get_u64(buf: &mut impl Buf, what: &'static str) -> Result<u64, WireError> {
    ensure(buf, 8, what)?;
    Ok(buf.get_u64())
}

pub fn put_byte_array(buf: &mut impl BufMut, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

pub fn try_get_byte_array(buf: &mut impl Buf) -> Result<Vec<u8>, WireError> {
    let len = try_get_u32(buf, "byte array length")? as usize;
    ensure(buf, len, "byte array body")?;
    let mut body = vec![0u8; len];
    buf.copy_to_slice(&mut body);
    Ok(body)
}

/// Strings travel as a u32 *character count* (not byte count) followed by one
/// 16-bit code unit per input character. Characters outside the BMP are
/// truncated to their low 16 bits - real surrogate-pair encoding is
/// deliberately not attempted, for parity with observed traffic.
pub fn put_string(buf: &mut impl BufMut, s: &str) {
    buf.put_u32(s.chars().count() as u32);
    for c in s.chars() {
        buf.put_u16(c as u16);
    }
}

pub fn try_get_string(buf: &mut impl Buf) -> Result<String, WireError> {
    let count = try_get_u32(buf, "string character count")? as usize;
    let mut result = String::with_capacity(count);
    for _ in 0..count {
        let unit = try_get_u16(buf, "string code unit")?;
        result.push(char::from_u32(unit as u32).unwrap_or(char::REPLACEMENT_CHARACTER));
    }
    Ok(result)
}

/// UUIDs travel as {u32 BE, u16 BE, u16 BE, 8 raw bytes}, which lays the 16
/// bytes out in the same order as the canonical hyphenated text form.
pub fn put_uuid(buf: &mut impl BufMut, uuid: &Uuid) {
    let (d1, d2, d3, d4) = uuid.as_fields();
    buf.put_u32(d1);
    buf.put_u16(d2);
    buf.put_u16(d3);
    buf.put_slice(d4);
}

pub fn try_get_uuid(buf: &mut impl Buf) -> Result<Uuid, WireError> {
    let d1 = try_get_u32(buf, "uuid field 1")?;
    let d2 = try_get_u16(buf, "uuid field 2")?;
    let d3 = try_get_u16(buf, "uuid field 3")?;
    ensure(buf, 8, "uuid field 4")?;
    let mut d4 = [0u8; 8];
    buf.copy_to_slice(&mut d4);
    Ok(Uuid::from_fields(d1, d2, d3, &d4))
}

pub fn uuid_from_text(text: &str) -> Result<Uuid, WireError> {
    Uuid::parse_str(text).map_err(|_| WireError::MalformedUuid(text.to_owned()))
}

/// Socket descriptors travel as family tag + address bytes + port. Only IPv4
/// is supported on the read path; the family tag of anything else is
/// surfaced so callers can decide how much of the surrounding structure to
/// abandon.
pub fn put_socket_addr(buf: &mut impl BufMut, addr: &SocketAddr) {
    match addr {
        SocketAddr::V4(v4) => {
            buf.put_u8(ADDRESS_FAMILY_IPV4);
            buf.put_slice(&v4.ip().octets());
            buf.put_u16(v4.port());
        }
        SocketAddr::V6(v6) => {
            buf.put_u8(ADDRESS_FAMILY_IPV6);
            buf.put_slice(&v6.ip().octets());
            buf.put_u16(v6.port());
        }
    }
}

pub fn try_get_socket_addr(buf: &mut impl Buf) -> Result<SocketAddr, WireError> {
    match try_get_u8(buf, "address family tag")? {
        ADDRESS_FAMILY_IPV4 => {
            ensure(buf, 4, "IPv4 address")?;
            let mut octets = [0u8; 4];
            buf.copy_to_slice(&mut octets);
            let port = try_get_u16(buf, "socket port")?;
            Ok(SocketAddr::V4(SocketAddrV4::new(octets.into(), port)))
        }
        family => Err(WireError::UnsupportedAddressFamily(family)),
    }
}

/// Compressed blobs carry the uncompressed length as a u32 BE prefix ahead
/// of a plain zlib deflate stream.
pub fn compress_blob(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 2 + 8);
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    let mut encoder = ZlibEncoder::new(out, Compression::default());
    encoder
        .write_all(data)
        .expect("writing to a Vec cannot fail");
    encoder.finish().expect("writing to a Vec cannot fail")
}

pub fn decompress_blob(data: &[u8]) -> Result<Vec<u8>, WireError> {
    if data.len() < 4 {
        return Err(WireError::CompressedBlobTooShort(data.len()));
    }
    let declared = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let mut out = Vec::with_capacity(declared);
    ZlibDecoder::new(&data[4..]).read_to_end(&mut out)?;
    if out.len() != declared {
        return Err(WireError::InflatedLengthMismatch {
            declared,
            actual: out.len(),
        });
    }
    Ok(out)
}
