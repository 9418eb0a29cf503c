//! Binary wire protocols.
//!
//! Every packet on every wire is `[HEADER][PAYLOAD]`, packed little-endian.
//! Three independent families, each with its own header, magic and port:
//!
//! - [`auth`]: client <-> auth server (and coordinator <-> auth server)
//! - [`matchmaking`]: client/dedicated server <-> coordinator
//! - [`game`]: client <-> dedicated server, minimal header for the hot path
//!
//! Payload structs are fixed-size; text travels as NUL-padded byte arrays
//! with explicit maxima. Parsing never copies the payload: decoders borrow
//! from the caller's receive buffer, so the payload must be consumed before
//! the buffer is reused.

pub mod auth;
pub mod game;
pub mod matchmaking;

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Largest datagram any service will read or build.
pub const MAX_DATAGRAM: usize = 2048;

/// Wire decoding errors. Malformed packets are dropped silently by the
/// services; the variants exist for logging at trace level and for tests.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram too short: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("bad protocol magic")]
    BadMagic,
    #[error("unsupported protocol version {0}")]
    BadVersion(u16),
    #[error("unknown message type {0}")]
    UnknownType(u16),
    #[error("declared payload of {declared} bytes exceeds datagram ({available} available)")]
    PayloadOverrun { declared: u32, available: usize },
}

/// Write `s` into a fixed `max`-byte field: truncated to `max - 1` bytes and
/// always NUL-terminated, remaining bytes zeroed.
pub(crate) fn put_fixed_str(buf: &mut impl BufMut, max: usize, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(max - 1);
    buf.put_slice(&bytes[..len]);
    buf.put_bytes(0, max - len);
}

/// Read a fixed `max`-byte field, stopping at the first NUL.
pub(crate) fn read_fixed_str(buf: &mut impl Buf, max: usize) -> String {
    let mut raw = vec![0u8; max];
    buf.copy_to_slice(&mut raw);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(max);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Decode guard: ensure at least `need` bytes remain.
pub(crate) fn ensure_len(buf: &impl Buf, need: usize) -> Result<(), WireError> {
    if buf.remaining() < need {
        return Err(WireError::Truncated {
            need,
            have: buf.remaining(),
        });
    }
    Ok(())
}
