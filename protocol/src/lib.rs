//! Wire layer for the Overte-compatible domain protocol.
//!
//! A domain server coordinates a small fleet of specialised services (entity
//! streaming, audio/avatar mixing, assets) behind a single UDP handshake
//! endpoint. Every logical packet is one UDP datagram framed as follows -
//! all numbers in network byte order (BE):
//!
//! ```ascii
//! 0:  sequence number + flags: u32
//!     * bit 31: control flag
//!     * bit 30: reliable flag
//!     * bit 29: message flag
//!     * bits 0-26: sequence number, monotonic per session, wrapping at 2^27
//! 4:  packet type (u8)
//! 5:  packet version (u8), per-type, taken from the signature table
//! 6:  source id (u16) - present only for "sourced" packet types
//! 6/8: payload
//! ```
//!
//! Whether a type is sourced is a static property of the packet type, not of
//! the buffer: a 6-byte and an 8-byte header are both structurally valid, so
//! receivers must consult [`packet::is_sourced`] rather than guess from
//! length.
//!
//! Payloads are serialized with the server's Qt-flavoured conventions
//! (big-endian primitives, length-prefixed byte arrays, UTF-16BE strings,
//! field-layout UUIDs, zlib blobs with an uncompressed-length prefix) - see
//! [`stream`]. The server admits a client only if the MD5 digest over the
//! client's per-type version table matches its own - see [`signature`].

pub mod packet;
pub mod signature;
pub mod stream;

use thiserror::Error;

/// Failure modes of the wire layer. All of these are recoverable by
/// discarding the current record or packet; none of them end a session.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("buffer exhausted while reading {0}")]
    Truncated(&'static str),

    #[error("unsupported address family tag {0} (only IPv4 is supported)")]
    UnsupportedAddressFamily(u8),

    #[error("malformed uuid text: {0}")]
    MalformedUuid(String),

    #[error("compressed blob too short: {0} byte(s), need at least 4")]
    CompressedBlobTooShort(usize),

    #[error("inflated length {actual} does not match the declared length {declared}")]
    InflatedLengthMismatch { declared: usize, actual: usize },

    #[error("zlib inflate failed: {0}")]
    Inflate(#[from] std::io::Error),
}
